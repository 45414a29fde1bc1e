use std::error::Error;
use std::fs;
use std::path::Path;

use census_multinom::config::{AnalysisConfig, CONFIG_FILE_PATH};
use census_multinom::{csv_reader, logging, simulate};

const SYNTHETIC_ROWS: usize = 5000;
const SEED: u64 = 42;

fn main() -> Result<(), Box<dyn Error>> {
    if let Err(err) = logging::init(Path::new(logging::LOG_DIR)) {
        eprintln!("logging disabled: {err}");
    }

    let config = AnalysisConfig::load_or_default(Path::new(CONFIG_FILE_PATH))?;
    if let Some(parent) = config.data_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let records = simulate::generate(SYNTHETIC_ROWS, SEED);
    csv_reader::write_data(&config.data_path, &records)?;
    tracing::info!(rows = records.len(), path = %config.data_path.display(), "wrote synthetic census data");
    println!("wrote {} synthetic records to {}", records.len(), config.data_path.display());
    Ok(())
}
