use anyhow::{Result, bail};
use candle_core::{Device, Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, PReLU, VarBuilder};

// channels of the raw image fed to the input reinforcement branches
const REINFORCEMENT_CHANNELS: usize = 3;
const BRANCHES: usize = 4;
const RECEPTIVE_LIMITS: [usize; 5] = [13, 11, 9, 7, 5];
const LEVEL3_REPEATS: usize = 3;
const LEVEL4_REPEATS: usize = 7;
const PSP_STAGES: usize = 4;

fn conv(
    vb: VarBuilder,
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    groups: usize,
) -> Result<Conv2d> {
    let config = Conv2dConfig {
        padding: (kernel - 1) / 2 * dilation,
        stride,
        dilation,
        groups,
        cudnn_fwd_algo: None,
    };
    Ok(candle_nn::conv2d_no_bias(
        in_channels,
        out_channels,
        kernel,
        config,
        vb.pp("conv"),
    )?)
}

fn batch_norm(vb: VarBuilder, channels: usize) -> Result<BatchNorm> {
    Ok(candle_nn::batch_norm(channels, 1e-5, vb.pp("bn"))?)
}

fn prelu(vb: VarBuilder, channels: usize) -> Result<PReLU> {
    Ok(candle_nn::prelu(Some(channels), vb)?)
}

/// Convolution, batch norm and PReLU.
struct Cbr {
    conv: Conv2d,
    bn: BatchNorm,
    act: PReLU,
}

impl Cbr {
    fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
    ) -> Result<Self> {
        Ok(Self {
            conv: conv(vb.clone(), in_channels, out_channels, kernel, stride, 1, groups)?,
            bn: batch_norm(vb.clone(), out_channels)?,
            act: prelu(vb.pp("act"), out_channels)?,
        })
    }
}

impl Module for Cbr {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, false)?;
        self.act.forward(&xs)
    }
}

/// Convolution and batch norm.
struct Cb {
    conv: Conv2d,
    bn: BatchNorm,
}

impl Cb {
    fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        groups: usize,
    ) -> Result<Self> {
        Ok(Self {
            conv: conv(vb.clone(), in_channels, out_channels, kernel, 1, 1, groups)?,
            bn: batch_norm(vb, out_channels)?,
        })
    }
}

impl Module for Cb {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.bn.forward_t(&self.conv.forward(xs)?, false)
    }
}

/// Batch norm and PReLU.
struct Br {
    bn: BatchNorm,
    act: PReLU,
}

impl Br {
    fn load(vb: VarBuilder, channels: usize) -> Result<Self> {
        Ok(Self {
            bn: batch_norm(vb.clone(), channels)?,
            act: prelu(vb.pp("act"), channels)?,
        })
    }
}

impl Module for Br {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.act.forward(&self.bn.forward_t(xs, false)?)
    }
}

/// Extremely efficient spatial pyramid of depth-wise dilated convolutions.
struct Eesp {
    proj_1x1: Cbr,
    spp_dw: Vec<Conv2d>,
    conv_1x1_exp: Cb,
    br_after_cat: Br,
    module_act: PReLU,
    // strided blocks hand their output to the down-sampler before activation
    strided: bool,
}

impl Eesp {
    fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        branches: usize,
        receptive_limit: usize,
    ) -> Result<Self> {
        let n = out_channels / branches;
        if n * branches != out_channels {
            bail!("{out_channels} channels cannot be split into {branches} branches");
        }

        let mut kernel_sizes: Vec<usize> = (0..branches)
            .map(|i| {
                let size = 3 + 2 * i;
                if size <= receptive_limit { size } else { 3 }
            })
            .collect();
        kernel_sizes.sort_unstable();

        let spp_dw = kernel_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                // a dilated 3x3 kernel with this rate covers `size` pixels
                let dilation = (size - 1) / 2;
                conv(vb.pp("spp_dw").pp(i), n, n, 3, stride, dilation, n)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            proj_1x1: Cbr::load(vb.pp("proj_1x1"), in_channels, n, 1, 1, branches)?,
            spp_dw,
            conv_1x1_exp: Cb::load(
                vb.pp("conv_1x1_exp"),
                out_channels,
                out_channels,
                1,
                branches,
            )?,
            br_after_cat: Br::load(vb.pp("br_after_cat"), out_channels)?,
            module_act: prelu(vb.pp("module_act"), out_channels)?,
            strided: stride == 2,
        })
    }
}

impl Module for Eesp {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let projected = self.proj_1x1.forward(xs)?;
        // hierarchical feature fusion: each branch adds the previous one
        let mut outputs: Vec<Tensor> = Vec::with_capacity(self.spp_dw.len());
        for conv in &self.spp_dw {
            let out = conv.forward(&projected)?;
            let out = match outputs.last() {
                Some(previous) => (out + previous)?,
                None => out,
            };
            outputs.push(out);
        }

        let merged = self.br_after_cat.forward(&Tensor::cat(&outputs, 1)?)?;
        let expanded = self.conv_1x1_exp.forward(&merged)?;
        if self.strided {
            return Ok(expanded);
        }

        let expanded = if expanded.dims() == xs.dims() {
            (expanded + xs)?
        } else {
            expanded
        };
        self.module_act.forward(&expanded)
    }
}

/// Strided EESP concatenated with average pooling, reinforced by the input
/// image.
struct DownSampler {
    eesp: Eesp,
    reinforcement: (Cbr, Cb),
    act: PReLU,
}

impl DownSampler {
    fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        receptive_limit: usize,
    ) -> Result<Self> {
        let eesp = Eesp::load(
            vb.pp("eesp"),
            in_channels,
            out_channels - in_channels,
            2,
            BRANCHES,
            receptive_limit,
        )?;
        let reinforcement = (
            Cbr::load(
                vb.pp("inp_reinf").pp(0),
                REINFORCEMENT_CHANNELS,
                REINFORCEMENT_CHANNELS,
                3,
                1,
                1,
            )?,
            Cb::load(
                vb.pp("inp_reinf").pp(1),
                REINFORCEMENT_CHANNELS,
                out_channels,
                1,
                1,
            )?,
        );

        Ok(Self {
            eesp,
            reinforcement,
            act: prelu(vb.pp("act"), out_channels)?,
        })
    }

    fn forward(&self, xs: &Tensor, image: &Tensor) -> candle_core::Result<Tensor> {
        let avg = avg_pool_3x3_s2(xs)?;
        let eesp = self.eesp.forward(xs)?;
        let output = Tensor::cat(&[&avg, &eesp], 1)?;

        let target = avg.dim(3)?;
        let mut image = image.clone();
        while image.dim(3)? > target {
            image = avg_pool_3x3_s2(&image)?;
        }
        if image.dim(3)? != target {
            candle_core::bail!(
                "reinforcement input width {} does not match {target}",
                image.dim(3)?
            );
        }

        let (cbr, cb) = &self.reinforcement;
        let reinforced = cb.forward(&cbr.forward(&image)?)?;
        self.act.forward(&(output + reinforced)?)
    }
}

struct Encoder {
    level1: Cbr,
    level2_0: DownSampler,
    level3_0: DownSampler,
    level3: Vec<Eesp>,
    level4_0: DownSampler,
    level4: Vec<Eesp>,
}

struct EncoderOutput {
    level1: Tensor,
    level2: Tensor,
    level3: Tensor,
    level4: Tensor,
}

impl Encoder {
    fn load(vb: VarBuilder, channels: &[usize; 4]) -> Result<Self> {
        let level3 = (0..LEVEL3_REPEATS)
            .map(|i| {
                Eesp::load(
                    vb.pp("level3").pp(i),
                    channels[2],
                    channels[2],
                    1,
                    BRANCHES,
                    RECEPTIVE_LIMITS[2],
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let level4 = (0..LEVEL4_REPEATS)
            .map(|i| {
                Eesp::load(
                    vb.pp("level4").pp(i),
                    channels[3],
                    channels[3],
                    1,
                    BRANCHES,
                    RECEPTIVE_LIMITS[3],
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            level1: Cbr::load(vb.pp("level1"), REINFORCEMENT_CHANNELS, channels[0], 3, 2, 1)?,
            level2_0: DownSampler::load(
                vb.pp("level2_0"),
                channels[0],
                channels[1],
                RECEPTIVE_LIMITS[0],
            )?,
            level3_0: DownSampler::load(
                vb.pp("level3_0"),
                channels[1],
                channels[2],
                RECEPTIVE_LIMITS[1],
            )?,
            level3,
            level4_0: DownSampler::load(
                vb.pp("level4_0"),
                channels[2],
                channels[3],
                RECEPTIVE_LIMITS[2],
            )?,
            level4,
        })
    }

    fn forward(&self, image: &Tensor) -> candle_core::Result<EncoderOutput> {
        let level1 = self.level1.forward(image)?;
        let level2 = self.level2_0.forward(&level1, image)?;

        let mut level3 = self.level3_0.forward(&level2, image)?;
        for block in &self.level3 {
            level3 = block.forward(&level3)?;
        }

        let mut level4 = self.level4_0.forward(&level3, image)?;
        for block in &self.level4 {
            level4 = block.forward(&level4)?;
        }

        Ok(EncoderOutput {
            level1,
            level2,
            level3,
            level4,
        })
    }
}

/// Pyramid pooling over progressively down-sampled features.
struct PspModule {
    stages: Vec<Conv2d>,
    project: Cbr,
}

impl PspModule {
    fn load(vb: VarBuilder, features: usize, out_features: usize) -> Result<Self> {
        let stages = (0..PSP_STAGES)
            .map(|i| conv(vb.pp("stages").pp(i), features, features, 3, 1, 1, features))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            stages,
            project: Cbr::load(
                vb.pp("project"),
                features * (PSP_STAGES + 1),
                out_features,
                1,
                1,
                1,
            )?,
        })
    }
}

impl Module for PspModule {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let mut outputs = vec![xs.clone()];
        let mut pooled = xs.clone();
        for stage in &self.stages {
            pooled = avg_pool_3x3_s2(&pooled)?;
            outputs.push(upsample_bilinear(&stage.forward(&pooled)?, h, w)?);
        }
        self.project.forward(&Tensor::cat(&outputs, 1)?)
    }
}

/// ESPNetv2 segmentation network.
pub struct EspNetV2 {
    net: Encoder,
    proj_l4_c: Cbr,
    psp_eesp: Eesp,
    psp: PspModule,
    project_l3: Conv2d,
    act_l3: Br,
    project_l2: Cbr,
    project_l1: Conv2d,
    classes: usize,
}

impl EspNetV2 {
    pub fn load(vb: VarBuilder, channels: &[usize; 4], classes: usize) -> Result<Self> {
        let psp_size = 2 * channels[2];
        let half = psp_size / 2;

        Ok(Self {
            net: Encoder::load(vb.pp("net"), channels)?,
            proj_l4_c: Cbr::load(vb.pp("proj_L4_C"), channels[3], channels[2], 1, 1, 1)?,
            psp_eesp: Eesp::load(vb.pp("pspMod").pp(0), psp_size, half, 1, BRANCHES, 7)?,
            psp: PspModule::load(vb.pp("pspMod").pp(1), half, half)?,
            // index 0 of these sequences is dropout
            project_l3: conv(vb.pp("project_l3").pp(1), half, classes, 1, 1, 1, 1)?,
            act_l3: Br::load(vb.pp("act_l3"), classes)?,
            project_l2: Cbr::load(vb.pp("project_l2"), channels[1] + classes, classes, 1, 1, 1)?,
            project_l1: conv(
                vb.pp("project_l1").pp(1),
                channels[0] + classes,
                classes,
                1,
                1,
                1,
                1,
            )?,
            classes,
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }
}

impl Module for EspNetV2 {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let encoded = self.net.forward(xs)?;

        let (_, _, h3, w3) = encoded.level3.dims4()?;
        let l4 = self.proj_l4_c.forward(&encoded.level4)?;
        let l4 = upsample_bilinear(&l4, h3, w3)?;
        let merged = Tensor::cat(&[&encoded.level3, &l4], 1)?;
        let merged = self.psp.forward(&self.psp_eesp.forward(&merged)?)?;
        let l3 = self.act_l3.forward(&self.project_l3.forward(&merged)?)?;

        let (_, _, h2, w2) = encoded.level2.dims4()?;
        let l3 = upsample_bilinear(&l3, h2, w2)?;
        let l2 = self
            .project_l2
            .forward(&Tensor::cat(&[&encoded.level2, &l3], 1)?)?;

        let (_, _, h1, w1) = encoded.level1.dims4()?;
        let l2 = upsample_bilinear(&l2, h1, w1)?;
        let l1 = self
            .project_l1
            .forward(&Tensor::cat(&[&encoded.level1, &l2], 1)?)?;

        upsample_bilinear(&l1, h, w)
    }
}

/// 3x3 average pooling with stride 2 and one pixel of zero padding, counted
/// in the average.
fn avg_pool_3x3_s2(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.pad_with_zeros(2, 1, 1)?
        .pad_with_zeros(3, 1, 1)?
        .avg_pool2d_with_stride((3, 3), (2, 2))
}

/// Bilinear resize of `(B, C, H, W)` with aligned corners.
pub(crate) fn upsample_bilinear(
    xs: &Tensor,
    out_h: usize,
    out_w: usize,
) -> candle_core::Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    if (h, w) == (out_h, out_w) {
        return Ok(xs.clone());
    }
    let device = xs.device();
    let dtype = xs.dtype();
    let cols = interpolation_matrix(w, out_w, device)?.to_dtype(dtype)?;
    let rows = interpolation_matrix(h, out_h, device)?.to_dtype(dtype)?;

    // resample the width, then the height, as plain 2d matmuls
    let xs = xs
        .contiguous()?
        .reshape((b * c * h, w))?
        .matmul(&cols)?
        .reshape((b * c, h, out_w))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((b * c * out_w, h))?
        .matmul(&rows)?
        .reshape((b * c, out_w, out_h))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((b, c, out_h, out_w))?;
    Ok(xs)
}

/// `(in_len, out_len)` weights of linear interpolation with aligned corners.
fn interpolation_matrix(
    in_len: usize,
    out_len: usize,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let mut weights = vec![0f32; in_len * out_len];
    for dst in 0..out_len {
        let src = if out_len > 1 {
            dst as f32 * (in_len - 1) as f32 / (out_len - 1) as f32
        } else {
            0.0
        };
        let lo = (src.floor() as usize).min(in_len - 1);
        let hi = (lo + 1).min(in_len - 1);
        let frac = src - lo as f32;
        weights[lo * out_len + dst] += 1.0 - frac;
        weights[hi * out_len + dst] += frac;
    }
    Tensor::from_vec(weights, (in_len, out_len), device)
}
