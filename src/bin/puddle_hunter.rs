//! Interactive entry point: prompts for tiles, dates and a working directory,
//! processes each tile, then optionally mosaics the results.

use anyhow::{anyhow, Context, Result};
use env_logger::{Builder, Env};
use puddle_hunter::{DateRange, SceneDate, Settings, TileCode};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

fn prompt(lines: &mut impl BufRead, message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut answer = String::new();
    if lines.read_line(&mut answer)? == 0 {
        return Err(anyhow!("Input closed before an answer to '{}'", message.trim()));
    }
    Ok(answer.trim().to_string())
}

/// Ask until the answer parses
fn prompt_until<T>(
    lines: &mut impl BufRead,
    message: &str,
    parse: impl Fn(&str) -> puddle_hunter::HunterResult<T>,
) -> Result<T> {
    loop {
        let answer = prompt(lines, message)?;
        match parse(&answer) {
            Ok(value) => return Ok(value),
            Err(e) => println!("  {}", e),
        }
    }
}

fn parse_tiles(answer: &str) -> puddle_hunter::HunterResult<Vec<TileCode>> {
    let tiles = answer
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(TileCode::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if tiles.is_empty() {
        return Err(puddle_hunter::HunterError::InvalidInput("Enter at least one tile code".to_string()));
    }
    Ok(tiles)
}

fn default_work_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("puddle_hunter")
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let stdin = io::stdin();
    let mut lines = stdin.lock();

    let tiles = prompt_until(&mut lines, "Tile codes (comma separated): ", parse_tiles)?;

    let range = loop {
        let start = prompt_until(&mut lines, "Start date (YYYYMMDD): ", SceneDate::parse)?;
        let end = prompt_until(&mut lines, "End date (YYYYMMDD): ", SceneDate::parse)?;
        match DateRange::new(start, end) {
            Ok(range) => break range,
            Err(e) => println!("  {}", e),
        }
    };

    let fallback = default_work_dir();
    let answer = prompt(
        &mut lines,
        &format!("Working directory [{}]: ", fallback.display()),
    )?;
    let work_dir = if answer.is_empty() { fallback } else { PathBuf::from(answer) };

    let settings = Settings::from_env_or_default(&work_dir).context("Failed to load settings")?;
    let processor = settings
        .build_processor()
        .with_context(|| format!("Failed to set up processing in {}", work_dir.display()))?;

    let start_time = Instant::now();
    let report = processor.process_batch(&tiles, &range);

    for tile in &report.completed {
        println!(
            "{}: {} observations from {} dates ({} skipped) -> {}",
            tile.tile,
            tile.observations,
            tile.dates_found,
            tile.masking.count_skipped(),
            tile.output.display()
        );
    }
    for (tile, error) in &report.failed {
        println!("{}: not processed, {}", tile, error);
    }
    println!(
        "Processed {} of {} tiles in {:.1}s",
        report.completed.len(),
        tiles.len(),
        start_time.elapsed().as_secs_f64()
    );

    let mosaic = prompt(&mut lines, "Mosaic the tile outputs? (Y/N): ")?;
    if mosaic.eq_ignore_ascii_case("y") || mosaic.eq_ignore_ascii_case("yes") {
        match processor.compose_mosaic(&range).context("Mosaic failed")? {
            Some(path) => println!("Mosaic written to {}", path.display()),
            None => println!("No tile outputs for {} found, no mosaic written", range),
        }
    }

    Ok(())
}
