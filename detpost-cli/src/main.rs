use clap::Parser;
use detpost::{
    BBoxPostProcess, BBoxPostProcessConfig, BatchBuffer, Detection, HeadOutput, ImageMeta,
    MapStack, MaskCanvas, MaskPostProcess, MaskPostProcessConfig, MatchMetric, NmsConfig,
    OriginShape, SampleBackend,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "detpost CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output for stage timings and counts.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MetricConfig {
    Iou,
    Ios,
}

impl From<MetricConfig> for MatchMetric {
    fn from(value: MetricConfig) -> Self {
        match value {
            MetricConfig::Iou => MatchMetric::Iou,
            MetricConfig::Ios => MatchMetric::Ios,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct NmsConfigJson {
    enabled: bool,
    match_threshold: f32,
    metric: MetricConfig,
    parallel: bool,
}

impl Default for NmsConfigJson {
    fn default() -> Self {
        let cfg = NmsConfig::default();
        Self {
            enabled: true,
            match_threshold: cfg.match_threshold,
            metric: MetricConfig::Iou,
            parallel: cfg.parallel,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RescaleConfigJson {
    export_onnx: bool,
    export_eb: bool,
    min_size: f32,
    parallel: bool,
    /// `[label, score, x1, y1, x2, y2]` substituted for empty images.
    sentinel: [f32; 6],
}

impl Default for RescaleConfigJson {
    fn default() -> Self {
        let cfg = BBoxPostProcessConfig::default();
        Self {
            export_onnx: cfg.export_onnx,
            export_eb: cfg.export_eb,
            min_size: cfg.min_size,
            parallel: cfg.parallel,
            sentinel: cfg.sentinel.to_row(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MaskConfigJson {
    binary_threshold: f32,
    /// Parsed with [`SampleBackend::from_str`]: "scalar", "cpu" or "parallel".
    backend: String,
}

impl Default for MaskConfigJson {
    fn default() -> Self {
        let cfg = MaskPostProcessConfig::default();
        Self {
            binary_threshold: cfg.binary_threshold,
            backend: "scalar".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    input_path: String,
    output_path: Option<String>,
    num_classes: usize,
    nms: NmsConfigJson,
    rescale: RescaleConfigJson,
    mask: MaskConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: String::new(),
            output_path: None,
            num_classes: NmsConfig::default().num_classes,
            nms: NmsConfigJson::default(),
            rescale: RescaleConfigJson::default(),
            mask: MaskConfigJson::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageMetaJson {
    im_shape: [f32; 2],
    scale_factor: [f32; 2],
    #[serde(default)]
    pad_shape: Option<[f32; 2]>,
}

impl ImageMetaJson {
    fn to_meta(&self) -> detpost::DetPostResult<ImageMeta> {
        let meta = ImageMeta::new(self.im_shape, self.scale_factor)?;
        match self.pad_shape {
            Some(pad) => meta.with_pad_shape(pad),
            None => Ok(meta),
        }
    }
}

/// Mask logits, one `height x width` map per output detection row.
#[derive(Debug, Deserialize)]
struct MaskLogitsJson {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Input {
    detections: Vec<[f32; 6]>,
    counts: Vec<usize>,
    images: Vec<ImageMetaJson>,
    #[serde(default)]
    masks: Option<MaskLogitsJson>,
}

#[derive(Debug, Serialize)]
struct MaskRecord {
    count: usize,
    height: usize,
    width: usize,
    data: Vec<i32>,
}

impl From<MaskCanvas> for MaskRecord {
    fn from(value: MaskCanvas) -> Self {
        Self {
            count: value.count(),
            height: value.height(),
            width: value.width(),
            data: value.into_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Output {
    detections: Vec<[f32; 6]>,
    counts: Vec<usize>,
    origin_shapes: Vec<[usize; 2]>,
    masks: Option<MaskRecord>,
}

fn shape_pair(shape: &OriginShape) -> [usize; 2] {
    [shape.height, shape.width]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("detpost=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.input_path.is_empty() {
        return Err("input_path must be set in the config".into());
    }

    let input_text = fs::read_to_string(&config.input_path)?;
    let input: Input = serde_json::from_str(&input_text)?;
    let metas = input
        .images
        .iter()
        .map(ImageMetaJson::to_meta)
        .collect::<Result<Vec<_>, _>>()?;

    let nms = config.nms.enabled.then(|| NmsConfig {
        num_classes: config.num_classes,
        match_threshold: config.nms.match_threshold,
        match_metric: config.nms.metric.into(),
        parallel: config.nms.parallel,
    });
    let head = if nms.is_some() {
        HeadOutput::Candidates
    } else {
        HeadOutput::Decoded
    };
    let processor = BBoxPostProcess::new(BBoxPostProcessConfig {
        num_classes: config.num_classes,
        nms,
        export_onnx: config.rescale.export_onnx,
        export_eb: config.rescale.export_eb,
        sentinel: Detection::from_row(config.rescale.sentinel),
        min_size: config.rescale.min_size,
        parallel: config.rescale.parallel,
    })?;

    let batch = BatchBuffer::from_table(&input.detections, input.counts)?;
    let nms_out = processor.run(head(batch))?;
    let pred = processor.get_pred(&nms_out, &metas)?;
    tracing::info!(
        images = metas.len(),
        kept = nms_out.len(),
        rows = pred.detections.len(),
        "boxes post-processed"
    );

    let masks = match &input.masks {
        Some(logits) => {
            let stack = MapStack::new(
                &logits.data,
                pred.detections.len(),
                logits.width,
                logits.height,
            )?;
            let post = MaskPostProcess::new(MaskPostProcessConfig {
                binary_threshold: config.mask.binary_threshold,
                export_onnx: config.rescale.export_onnx,
                backend: SampleBackend::from_str(&config.mask.backend)?,
            })?;
            let canvas = post.run(stack, &pred.detections, &pred.origin_shapes)?;
            tracing::info!(
                planes = canvas.count(),
                height = canvas.height(),
                width = canvas.width(),
                "masks pasted"
            );
            Some(canvas)
        }
        None => None,
    };

    let output = Output {
        detections: pred.detections.to_table(),
        counts: pred.detections.counts().to_vec(),
        origin_shapes: pred.origin_shapes.iter().map(shape_pair).collect(),
        masks: masks.map(MaskRecord::from),
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
