use std::io;

use crate::formatter::*;

/// A formatter that produces no output.
///
/// Useful when the caller only cares about the returned
/// [`RunReport`](crate::report::RunReport), for example when embedding
/// nestrun into another tool that does its own reporting.
#[derive(Debug, Default, Clone)]
pub struct NoFormatter;

impl RunFormatter for NoFormatter {
    fn fmt_case_outcome(&mut self, _: FmtCaseOutcome<'_>) -> io::Result<()> {
        Ok(())
    }

    fn fmt_run_outcomes(&mut self, _: FmtRunOutcomes<'_>) -> io::Result<()> {
        Ok(())
    }
}
