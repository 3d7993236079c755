//! Recover command implementation.

use super::Target;
use std::io::Write;

/// Runs the recover command.
///
/// Opening the database resolves every leftover journal; this command
/// opens, reports and closes.
pub fn run(target: &Target, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    let db = target.open()?;
    let report = db.recovery_report();
    db.close()?;

    if report.is_clean() {
        writeln!(out, "No pending journals in {}", target.path.display())?;
    } else {
        writeln!(out, "Recovered {}", target.path.display())?;
        writeln!(out, "  Replayed:  {}", report.replayed)?;
        writeln!(out, "  Discarded: {}", report.discarded)?;
    }
    Ok(())
}
