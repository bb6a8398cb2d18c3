use std::path::PathBuf;
use std::time::Instant;

use nonvocal_rs::config::{ClassifierConfig, Device, GenerationParams, StrategyKind};
use nonvocal_rs::SoundClassifier;

fn print_usage() {
    eprintln!("Usage: classify [--strategy <name>] [--device <cpu|cuda[:N]>] [--language <code>]");
    eprintln!("                [--config <file>] [model] [audio_file]");
    eprintln!();
    eprintln!("  --strategy  transcription | embedding | token_score | fine_tuned_head");
    eprintln!("              (default: transcription)");
    eprintln!("  --device    cpu (default) or cuda, optionally with a device id (cuda:1)");
    eprintln!("  --language  language token for generation strategies (default: en)");
    eprintln!("  --config    JSON classifier config; overrides the options above and model");
    eprintln!();
    eprintln!("  model (default: openai/whisper-small)");
    eprintln!("    A model directory, or a name resolved under $NONVOCAL_MODELS_DIR");
    eprintln!();
    eprintln!("  audio_file (default: samples/siren.wav)");
}

fn parse_strategy(name: &str) -> Option<StrategyKind> {
    match name {
        "transcription" => Some(StrategyKind::Transcription),
        "embedding" => Some(StrategyKind::Embedding),
        "token_score" => Some(StrategyKind::TokenScore),
        "fine_tuned_head" => Some(StrategyKind::FineTunedHead),
        _ => None,
    }
}

fn parse_device(name: &str) -> Option<Device> {
    match name.split_once(':') {
        None if name == "cpu" => Some(Device::Cpu),
        None if name == "cuda" => Some(Device::Cuda { device_id: 0 }),
        Some(("cuda", id)) => id.parse().ok().map(|device_id| Device::Cuda { device_id }),
        _ => None,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut strategy = StrategyKind::Transcription;
    let mut device = Device::Cpu;
    let mut generation = GenerationParams::default();
    let mut config_path: Option<PathBuf> = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--strategy" => {
                let Some(kind) = iter.next().and_then(|s| parse_strategy(s)) else {
                    print_usage();
                    std::process::exit(2);
                };
                strategy = kind;
            }
            "--device" => {
                let Some(d) = iter.next().and_then(|s| parse_device(s)) else {
                    print_usage();
                    std::process::exit(2);
                };
                device = d;
            }
            "--language" => {
                let Some(lang) = iter.next() else {
                    print_usage();
                    std::process::exit(2);
                };
                generation.language = Some(lang.clone());
            }
            "--config" => {
                let Some(path) = iter.next() else {
                    print_usage();
                    std::process::exit(2);
                };
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            _ => positional.push(arg.as_str()),
        }
    }

    let config = match config_path {
        Some(path) => ClassifierConfig::from_file(&path)?,
        None => ClassifierConfig::new(
            strategy,
            positional.first().copied().unwrap_or("openai/whisper-small"),
        )
        .with_device(device)
        .with_generation(generation),
    };
    let audio_path = PathBuf::from(positional.get(1).copied().unwrap_or("samples/siren.wav"));

    println!("Strategy: {}", config.strategy.as_str());
    println!("Loading model: {}", config.model_location);

    let load_start = Instant::now();
    let mut classifier = SoundClassifier::new(config)?;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    println!("Classifying file: {:?}", audio_path);
    let classify_start = Instant::now();
    let result = classifier.classify(&audio_path)?;
    println!("Classification completed in {:.2?}", classify_start.elapsed());

    println!("Class: {}", result.class_name);
    println!("Confidence: {:.3}", result.confidence_unit());
    if let Some(probabilities) = &result.probabilities {
        for (name, p) in probabilities.iter() {
            println!("  {:<20} {:.3}", name, p);
        }
    }
    println!("{}", result.to_json()?);

    Ok(())
}
