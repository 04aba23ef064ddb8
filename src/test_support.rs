use std::{cell::RefCell, fmt, future::Future, io, rc::Rc};

use crate::{
    case::{BodyResult, CaseApi},
    context::Group,
    filter::{CaseFilter, NoFilter, SubstringFilter},
    formatter::{common::color::SupportsColor, pretty::PrettyFormatter},
    orchestrator::Orchestrator,
    report::RunReport,
    snapshot::SnapshotStore,
};

/// Captures formatter output.
#[derive(Debug, Default, Clone)]
pub struct Buffer(Rc<RefCell<Vec<u8>>>);

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SupportsColor for Buffer {
    fn supports_color(&self) -> bool {
        false
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0.borrow()))
    }
}

pub type TestOrchestrator = Orchestrator<Box<dyn CaseFilter>, PrettyFormatter<Buffer, Buffer>>;

pub async fn unreachable_body(_: CaseApi) {
    panic!("this body must not run")
}

/// Run `body` with output captured and snapshots in a temporary directory.
pub async fn run_with<F, Fut, R>(
    configure: impl FnOnce(TestOrchestrator) -> TestOrchestrator,
    body: F,
) -> (RunReport, String)
where
    F: FnOnce(Group) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::default();
    let orchestrator = Orchestrator::new()
        .with_filter(Box::new(NoFilter) as Box<dyn CaseFilter>)
        .with_formatter(
            PrettyFormatter::default()
                .with_target(buffer.clone())
                .with_color_setting(false),
        )
        .with_snapshot_store(SnapshotStore::new(dir.path().join(".nestrun.snap")));

    let report = configure(orchestrator).run(body).await;
    (report, buffer.to_string())
}

pub async fn run<F, Fut, R>(body: F) -> (RunReport, String)
where
    F: FnOnce(Group) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    run_with(|orchestrator| orchestrator, body).await
}

pub async fn run_filtered<F, Fut, R>(filter: &str, body: F) -> (RunReport, String)
where
    F: FnOnce(Group) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    run_with(
        |orchestrator| orchestrator.with_filter(Box::new(SubstringFilter::new(filter)) as Box<dyn CaseFilter>),
        body,
    )
    .await
}

macro_rules! nonzero {
    (0) => {
        compile_error!("0 is zero")
    };

    ($value:literal) => {
        std::num::NonZeroUsize::new($value).unwrap()
    };
}

pub(crate) use nonzero;
