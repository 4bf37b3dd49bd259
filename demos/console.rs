use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use floatywords::{
    engines::simulated::{SimulatedEngine, SimulatedEngineConfigBuilder},
    runtime::SyncRuntime,
    SyncConfig,
};

const USAGE: &str = "usage: console [--estimate] [--rate R] [--offset SECS] [--config FILE] [TEXT...]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut estimate = false;
    let mut rate = None;
    let mut offset = None;
    let mut config_path = None;
    let mut words = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--estimate" => estimate = true,
            "--rate" => rate = Some(args.next().ok_or(USAGE)?.parse::<f32>()?),
            "--offset" => offset = Some(args.next().ok_or(USAGE)?.parse::<f32>()?),
            "--config" => config_path = Some(PathBuf::from(args.next().ok_or(USAGE)?)),
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ => words.push(arg),
        }
    }

    let text = if words.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        words.join(" ")
    };
    if text.trim().is_empty() {
        eprintln!("Nothing to speak.\n{USAGE}");
        return Ok(());
    }

    let mut config = match &config_path {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(rate) = rate {
        config.rate = rate;
    }
    if let Some(offset) = offset {
        config.offset_secs = offset;
    }
    config.validate()?;
    let drain = Duration::from_secs_f32(config.offset_secs.max(0.0));

    // A voice without boundaries exercises the estimator.
    let engine_config = SimulatedEngineConfigBuilder::default()
        .reports_boundaries(!estimate)
        .build()?;
    let (engine, engine_events) = SimulatedEngine::new(engine_config);
    let (runtime, handle, mut revealed) = SyncRuntime::new(engine, engine_events, config)?;
    let runtime = tokio::spawn(runtime.run());

    let mut state = handle.subscribe();
    handle.play(text)?;
    state.wait_for(|s| s.is_playing).await?;

    loop {
        tokio::select! {
            Some(word) = revealed.recv() => {
                println!("{:>6}ms  {:<9}  {}", word.at_ms, word.mode, word.word);
            }
            result = state.wait_for(|s| !s.is_playing) => {
                result?;
                break;
            }
        }
    }

    // Let offset-delayed words land before shutting down.
    tokio::time::sleep(drain).await;
    while let Ok(word) = revealed.try_recv() {
        println!("{:>6}ms  {:<9}  {}", word.at_ms, word.mode, word.word);
    }
    println!("Sync mode: {}", handle.state().sync_mode);

    drop(handle);
    runtime.await?;
    Ok(())
}
