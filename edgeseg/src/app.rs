use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use edgeseg_ml::{ExecutionContext, Palette, Segmenter, espnetv2::EspNetV2};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::{
    batch::{self, OutputDirs},
    camera,
    dataset::{self, DatasetName, Split},
    error::{Error, Result},
    render::Renderer,
    weights::{ModelName, WeightMap},
};

/// Where input images come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Dataset,
    Camera,
}

#[derive(Debug, Parser)]
#[command(version, about = "Semantic segmentation with ESPNetv2")]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = ModelName::Espnetv2, help = "Segmentation network")]
    pub model: ModelName,
    #[arg(
        long,
        value_name = "FILE",
        help = "Weight file to test, bypassing the weight table"
    )]
    pub weights_test: Option<PathBuf>,
    #[arg(long = "s", value_name = "SCALE", default_value_t = 2.0, help = "Network width scale")]
    pub scale: f64,
    #[arg(long, value_name = "DIR", default_value = ".", help = "Dataset root directory")]
    pub data_path: PathBuf,
    #[arg(long, value_enum, default_value_t = DatasetName::City)]
    pub dataset: DatasetName,
    #[arg(
        long,
        num_args = 2,
        value_names = ["W", "H"],
        value_parser = clap::value_parser!(u32).range(1..),
        default_values_t = [512, 256],
        help = "Network input size"
    )]
    pub im_size: Vec<u32>,
    #[arg(long, value_enum, default_value_t = Split::Val)]
    pub split: Split,
    #[arg(long, default_value_t = 224, help = "ImageNet input width, unused")]
    pub model_width: u32,
    #[arg(long, default_value_t = 224, help = "ImageNet input height, unused")]
    pub model_height: u32,
    #[arg(long, default_value_t = 3, help = "ImageNet input channels, unused")]
    pub channels: u32,
    #[arg(long, default_value_t = 1000, help = "ImageNet classes, unused")]
    pub num_classes: usize,
    #[arg(long, value_enum, default_value_t = Source::Dataset)]
    pub source: Source,
    #[arg(long, value_name = "N", default_value_t = 0, help = "Capture device index")]
    pub camera_index: i32,
    #[arg(long, value_name = "DIR", default_value = "./seg_results")]
    pub savedir: PathBuf,
    #[arg(long, value_enum, help = "Color palette, the dataset's own by default")]
    pub palette: Option<Palette>,
    #[arg(
        long,
        value_name = "ALPHA",
        help = "Blend the colors over the input with this weight"
    )]
    pub overlay: Option<f32>,
    #[arg(long, value_name = "JSON", help = "Weight table replacing the built-in one")]
    pub weight_map: Option<PathBuf>,
    #[arg(
        long,
        value_name = "DIR",
        default_value = ".",
        help = "Directory relative weight paths are taken from"
    )]
    pub weights_root: PathBuf,
    #[arg(
        long,
        help = "Force using CPU even if GPU is available",
        default_value_t = false
    )]
    pub cpu: bool,
}

impl Cli {
    pub fn input_size(&self) -> (u32, u32) {
        (self.im_size[0], self.im_size[1])
    }
}

fn initialize() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    initialize();
    execute(&cli)
}

/// Resolves the weights, loads the network once and segments every input
/// from the selected source.
pub fn execute(cli: &Cli) -> Result<()> {
    tracing::debug!(
        model_width = cli.model_width,
        model_height = cli.model_height,
        channels = cli.channels,
        num_classes = cli.num_classes,
        "ImageNet arguments are not used for segmentation"
    );

    let weights = resolve_weights(cli)?;
    if cli.model == ModelName::Dicenet {
        return Err(Error::Unsupported(
            "the dicenet network is not available, use espnetv2".to_string(),
        ));
    }
    if !edgeseg_ml::espnetv2::supported_scales().any(|s| s == cli.scale) {
        return Err(Error::Unsupported(format!(
            "ESPNetv2 scale {} is not supported",
            cli.scale
        )));
    }

    let context = ExecutionContext::select(cli.cpu)?;
    let classes = cli.dataset.classes().len();
    let model = EspNetV2::from_file(&weights, cli.scale, classes, context.device())?;
    let segmenter = Segmenter::new(model, context, cli.input_size(), classes);
    tracing::info!(
        classes = segmenter.classes(),
        "using {} device",
        segmenter.context().name()
    );

    let palette = cli.palette.unwrap_or(cli.dataset.default_palette());
    let renderer = Renderer::new(palette, segmenter.classes(), cli.overlay)?;

    match cli.source {
        Source::Dataset => {
            let images = dataset::enumerate(cli.dataset, &cli.data_path, cli.split)?;
            batch::run(
                &segmenter,
                &renderer,
                &images,
                &OutputDirs::new(&cli.savedir),
                cli.dataset.uses_label_ids(),
            )?;
        }
        Source::Camera => {
            camera::run(&segmenter, &renderer, cli.camera_index)?;
        }
    }
    Ok(())
}

/// `--weights-test` wins over the weight table.
fn resolve_weights(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.weights_test {
        if !path.is_file() {
            return Err(Error::MissingFile {
                what: "weight file",
                path: path.clone(),
            });
        }
        return Ok(path.clone());
    }

    let custom;
    let map = match &cli.weight_map {
        Some(path) => {
            custom = WeightMap::from_json_file(path)?;
            &custom
        }
        None => WeightMap::builtin(),
    };
    map.resolve(
        cli.model,
        cli.scale,
        cli.dataset,
        cli.input_size(),
        &cli.weights_root,
    )
}
