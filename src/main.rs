use std::error::Error;
use std::path::Path;

use census_multinom::config::{AnalysisConfig, CONFIG_FILE_PATH};
use census_multinom::{analysis, logging, report, viewer};

fn main() -> Result<(), Box<dyn Error>> {
    if let Err(err) = logging::init(Path::new(logging::LOG_DIR)) {
        eprintln!("logging disabled: {err}");
    }

    let config = AnalysisConfig::load_or_default(Path::new(CONFIG_FILE_PATH))?;
    let analysis = analysis::run(&config)?;
    let paths = report::write_outputs(&analysis, &config.output_dir)?;

    viewer::run(&analysis)?;

    println!("report written to {}", paths.report.display());
    println!("summary written to {}", paths.summary.display());
    Ok(())
}
