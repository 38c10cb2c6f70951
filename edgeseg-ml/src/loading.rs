use std::path::Path;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;

// data-parallel checkpoints store every tensor under this prefix
const DATA_PARALLEL_PREFIX: &str = "module";

/// Opens a checkpoint as a `VarBuilder`.
///
/// `.safetensors` files are memory mapped, `.pth`/`.pt` files are read as
/// PyTorch state dicts.
pub fn load_var_builder(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let vb = match extension.as_deref() {
        Some("safetensors") => unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)
                .with_context(|| format!("failed to map {}", path.display()))?
        },
        Some("pth") | Some("pt") => VarBuilder::from_pth(path, DType::F32, device)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => bail!("unsupported weight file format: {}", path.display()),
    };

    Ok(vb)
}

/// Scopes `vb` under the data-parallel prefix when the checkpoint uses it.
pub(crate) fn strip_data_parallel<'a>(vb: VarBuilder<'a>, probe: &str) -> VarBuilder<'a> {
    if !vb.contains_tensor(probe) && vb.contains_tensor(&format!("{DATA_PARALLEL_PREFIX}.{probe}"))
    {
        tracing::debug!("checkpoint uses the `{DATA_PARALLEL_PREFIX}.` prefix");
        vb.pp(DATA_PARALLEL_PREFIX)
    } else {
        vb
    }
}
