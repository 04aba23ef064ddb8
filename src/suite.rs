//! Reusable test suites.
//!
//! A [`TestSuite`] is a function of a [`Group`] and some arguments that
//! registers cases. Suites are usually defined in their own module and run
//! from a parent group with [`Group::run_test_suite`], or loaded lazily with
//! [`Group::load_test_suite`] from a future resolving to a [`SuiteModule`].

use std::{borrow::Cow, fmt, future::Future, rc::Rc};

use futures::{FutureExt, future::LocalBoxFuture};

use crate::{
    case::BodyResult,
    context::{Group, GroupOptions},
    error::UsageError,
    handle::GroupHandle,
};

/// How many default export envelopes [`unwrap_module`] looks through.
pub const MAX_MODULE_DEPTH: usize = 2;

type SuiteFn<A> = Rc<dyn Fn(Group, A) -> LocalBoxFuture<'static, BodyResult>>;

pub struct TestSuite<A = ()> {
    title: Option<Cow<'static, str>>,
    options: GroupOptions,
    run: SuiteFn<A>,
}

impl<A: 'static> TestSuite<A> {
    /// A suite that registers its cases directly under the group running it.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Group, A) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        Self {
            title: None,
            options: GroupOptions::default(),
            run: Rc::new(move |group, args| {
                let fut = f(group, args);
                async move { fut.await.into() }.boxed_local()
            }),
        }
    }

    /// A suite that runs inside its own group titled `title`.
    pub fn named<F, Fut, R>(title: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(Group, A) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        Self {
            title: Some(title.into()),
            ..Self::new(f)
        }
    }
}

impl<A> TestSuite<A> {
    pub fn with_options(self, options: impl Into<GroupOptions>) -> Self {
        Self {
            options: options.into(),
            ..self
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

impl<A> Clone for TestSuite<A> {
    fn clone(&self) -> Self {
        Self {
            title: self.title.clone(),
            options: self.options,
            run: Rc::clone(&self.run),
        }
    }
}

impl<A> fmt::Debug for TestSuite<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("title", &self.title)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A suite as exported by a lazily loaded module.
///
/// Module systems may wrap the exported value in one or more default export
/// envelopes, [`unwrap_module`] removes them.
#[derive(Debug)]
pub enum SuiteModule<A = ()> {
    Suite(TestSuite<A>),
    Default(Box<SuiteModule<A>>),
}

impl<A> SuiteModule<A> {
    /// Wrap `self` in one more default export envelope.
    pub fn into_default(self) -> Self {
        SuiteModule::Default(Box::new(self))
    }
}

impl<A> From<TestSuite<A>> for SuiteModule<A> {
    fn from(suite: TestSuite<A>) -> Self {
        SuiteModule::Suite(suite)
    }
}

/// Remove up to [`MAX_MODULE_DEPTH`] default export envelopes.
pub fn unwrap_module<A>(mut module: SuiteModule<A>) -> Result<TestSuite<A>, UsageError> {
    for _ in 0..=MAX_MODULE_DEPTH {
        match module {
            SuiteModule::Suite(suite) => return Ok(suite),
            SuiteModule::Default(inner) => module = *inner,
        }
    }
    Err(UsageError::ModuleNestedTooDeep(MAX_MODULE_DEPTH))
}

impl Group {
    /// Run `suite` with `args` as a child of this group.
    pub fn run_test_suite<A: 'static>(&self, suite: &TestSuite<A>, args: A) -> GroupHandle {
        let title = match suite.title() {
            Some(title) => self.child_title(title),
            None => self.title().to_string(),
        };
        let child = self.child(title, suite.options);
        let run = Rc::clone(&suite.run);
        self.spawn_group(child, move |group| run(group, args))
    }

    /// Await `module`, unwrap it and run the suite it exports.
    pub fn load_test_suite<M, A>(&self, module: M, args: A) -> GroupHandle
    where
        M: Future<Output = SuiteModule<A>> + 'static,
        A: 'static,
    {
        let child = self.child(self.title().to_string(), GroupOptions::default());
        self.spawn_group(child, move |group: Group| async move {
            let suite = unwrap_module(module.await)?;
            group.run_test_suite(&suite, args).await;
            Ok::<_, UsageError>(())
        })
    }
}
