use std::io;

use crate::{
    error::CaseFailure,
    formatter::{
        common::{
            color::{ColorSetting, SupportsColor, colors::*, paint},
            *,
        },
        *,
    },
};

/// The default formatter, one line per settled case.
///
/// Passing and skipped cases go to `stdout`, failures (case, hook and group
/// errors) go to `stderr`. Color is decided by the `stdout` target.
#[derive(Debug)]
pub struct PrettyFormatter<Out: io::Write, Err: io::Write> {
    stdout: Out,
    stderr: Err,
    color_setting: ColorSetting,
}

impl Default for PrettyFormatter<io::Stdout, io::Stderr> {
    fn default() -> Self {
        Self {
            stdout: io::stdout(),
            stderr: io::stderr(),
            color_setting: Default::default(),
        }
    }
}

impl<Out: io::Write, Err: io::Write> PrettyFormatter<Out, Err> {
    pub fn with_stdout<WithOut: io::Write>(self, stdout: WithOut) -> PrettyFormatter<WithOut, Err> {
        PrettyFormatter {
            stdout,
            stderr: self.stderr,
            color_setting: self.color_setting,
        }
    }

    pub fn with_stderr<WithErr: io::Write>(self, stderr: WithErr) -> PrettyFormatter<Out, WithErr> {
        PrettyFormatter {
            stdout: self.stdout,
            stderr,
            color_setting: self.color_setting,
        }
    }

    /// Send both streams into the same target.
    pub fn with_target<W: io::Write + Clone>(self, target: W) -> PrettyFormatter<W, W> {
        PrettyFormatter {
            stdout: target.clone(),
            stderr: target,
            color_setting: self.color_setting,
        }
    }

    pub fn with_color_setting(self, color_setting: impl Into<ColorSetting>) -> Self {
        PrettyFormatter {
            color_setting: color_setting.into(),
            ..self
        }
    }
}

impl<Out: io::Write + SupportsColor, Err: io::Write> PrettyFormatter<Out, Err> {
    /// Return whether this formatter will currently emit colored output.
    pub fn use_color(&self) -> bool {
        match self.color_setting {
            ColorSetting::Automatic => self.stdout.supports_color(),
            ColorSetting::Always => true,
            ColorSetting::Never => false,
        }
    }
}

fn write_failure(target: &mut impl io::Write, failure: &CaseFailure) -> io::Result<()> {
    for line in failure.to_string().lines() {
        writeln!(target, "    {line}")?;
    }
    Ok(())
}

fn attempt_annotation(attempt: u32, retries: u32) -> Option<String> {
    (retries > 1).then(|| format!("({attempt}/{retries})"))
}

impl<Out: io::Write + SupportsColor, Err: io::Write> RunFormatter for PrettyFormatter<Out, Err> {
    fn fmt_run_start(&mut self, FmtRunStart { filter }: FmtRunStart<'_>) -> io::Result<()> {
        let Some(filter) = filter else {
            return Ok(());
        };
        let banner = format!("Only running tests that match: \"{filter}\"");
        writeln!(self.stdout, "{}\n", paint(self.use_color(), DIM, banner))
    }

    fn fmt_case_outcome(&mut self, data: FmtCaseOutcome<'_>) -> io::Result<()> {
        let color = self.use_color();
        let mut line = data.title.to_string();
        if let FmtStatus::Passed | FmtStatus::Failed(_) = data.status {
            let annotations = [
                attempt_annotation(data.attempt, data.retries),
                duration_annotation(data.duration, data.timeout),
            ];
            for annotation in annotations.into_iter().flatten() {
                line.push(' ');
                line.push_str(&paint(color, DIM, annotation));
            }
        }

        match data.status {
            FmtStatus::Passed => writeln!(self.stdout, "{} {line}", paint(color, GREEN, '✔')),
            FmtStatus::Skipped { reason } => match reason {
                Some(reason) => writeln!(self.stdout, "{} {line}: {reason}", paint(color, YELLOW, '○')),
                None => writeln!(self.stdout, "{} {line}", paint(color, YELLOW, '○')),
            },
            FmtStatus::Failed(failure) => {
                writeln!(self.stderr, "{} {line}", paint(color, RED, '✖'))?;
                write_failure(&mut self.stderr, failure)
            }
        }
    }

    fn fmt_hook_error(
        &mut self,
        FmtHookError { title, stage, failure }: FmtHookError<'_>,
    ) -> io::Result<()> {
        let icon = paint(self.use_color(), RED, '✖');
        match title.is_empty() {
            true => writeln!(self.stderr, "{icon} [{stage}]")?,
            false => writeln!(self.stderr, "{icon} {title} [{stage}]")?,
        }
        write_failure(&mut self.stderr, failure)
    }

    fn fmt_group_error(&mut self, FmtGroupError { title, failure }: FmtGroupError<'_>) -> io::Result<()> {
        if !title.is_empty() {
            let icon = paint(self.use_color(), RED, '✖');
            writeln!(self.stderr, "{icon} {title}")?;
        }
        write_failure(&mut self.stderr, failure)
    }

    fn fmt_process_timeout(&mut self, FmtProcessTimeout { timeout }: FmtProcessTimeout) -> io::Result<()> {
        let line = format!("✖ Process timed out after {}ms", timeout.as_millis());
        writeln!(self.stderr, "{}", paint(self.use_color(), RED, line))
    }

    fn fmt_run_outcomes(
        &mut self,
        FmtRunOutcomes { summary, snapshots }: FmtRunOutcomes<'_>,
    ) -> io::Result<()> {
        if summary.total == 0 && snapshots.is_empty() {
            return Ok(());
        }
        let color = self.use_color();

        if summary.total > 0 {
            if !summary.pending_cases.is_empty() {
                writeln!(self.stdout)?;
                for pending in summary.pending_cases.iter() {
                    write!(self.stdout, "{} {}", paint(color, YELLOW, '•'), pending.title)?;
                    if let Some(annotation) = duration_annotation(pending.elapsed, pending.timeout) {
                        write!(self.stdout, " {}", paint(color, DIM, annotation))?;
                    }
                    writeln!(self.stdout)?;
                }
            }

            writeln!(self.stdout)?;
            writeln!(
                self.stdout,
                "{}",
                paint(color, DIM, format!("Completed in {}", pretty_duration(summary.elapsed)))
            )?;

            let passed = format!("{} passed", summary.passed);
            match summary.passed {
                0 => writeln!(self.stdout, "{}", paint(color, DIM, passed))?,
                _ => writeln!(self.stdout, "{}", paint(color, GREEN, passed))?,
            }
            if summary.failed > 0 {
                let failed = format!("{} failed", summary.failed);
                writeln!(self.stdout, "{}", paint(color, RED, failed))?;
            }
            if summary.skipped > 0 {
                writeln!(self.stdout, "{} skipped", summary.skipped)?;
            }
            if summary.pending > 0 {
                let pending = format!("{} pending", summary.pending);
                writeln!(self.stdout, "{}", paint(color, YELLOW, pending))?;
            }
        }

        if !snapshots.is_empty() {
            let mut parts = Vec::with_capacity(2);
            if snapshots.new > 0 {
                parts.push(format!("📸 {} new", snapshots.new));
            }
            if snapshots.updated > 0 {
                parts.push(format!("✏️ {} updated", snapshots.updated));
            }
            writeln!(self.stdout)?;
            writeln!(self.stdout, "Snapshots: {}", parts.join(", "))?;
        }

        writeln!(self.stdout)
    }
}
