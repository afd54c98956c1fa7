use std::io::Write;
use std::path::Path;

use crate::engine::replay::ReplaySummary;
use crate::errors::EngineError;
use crate::models::intent::RenderIntent;
use crate::models::signal::SignalRecord;

/// Write confirmed signals to a CSV file.
pub fn write_signals_csv(signals: &[SignalRecord], path: &Path) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| EngineError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record(["Bar", "Time", "Direction", "Signal"])
        .map_err(|e| EngineError::FileWrite(e.to_string()))?;

    for s in signals {
        wtr.write_record([
            &s.index.to_string(),
            &s.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            &format!("{:?}", s.direction),
            &s.direction.as_i8().to_string(),
        ])
        .map_err(|e| EngineError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| EngineError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write one row per replayed series.
pub fn write_replay_summary_csv(summaries: &[ReplaySummary], path: &Path) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| EngineError::FileWrite(format!("Cannot create CSV: {}", e)))?;

    wtr.write_record([
        "Series",
        "Bars",
        "Evaluated",
        "Skipped",
        "Faults",
        "Wicks Found",
        "Up Signals",
        "Down Signals",
    ])
    .map_err(|e| EngineError::FileWrite(e.to_string()))?;

    for s in summaries {
        let ups = s.signals.iter().filter(|r| r.direction.as_i8() > 0).count();
        let downs = s.signals.len() - ups;
        wtr.write_record([
            &s.name,
            &s.bars.to_string(),
            &s.evaluated.to_string(),
            &s.skipped.to_string(),
            &s.faults.to_string(),
            &s.wicks_found.to_string(),
            &ups.to_string(),
            &downs.to_string(),
        ])
        .map_err(|e| EngineError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| EngineError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Dump render intents as a pretty-printed JSON array for a rendering host.
pub fn write_intents_json(intents: &[RenderIntent], path: &Path) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(intents)?;
    let mut file = std::fs::File::create(path)
        .map_err(|e| EngineError::FileWrite(format!("Cannot create JSON: {}", e)))?;
    file.write_all(json.as_bytes())
        .map_err(|e| EngineError::FileWrite(e.to_string()))?;
    Ok(())
}
