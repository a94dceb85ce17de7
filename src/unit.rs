//! Units: named subsystems with an initializer and a run future.
//!
//! A unit is registered with an [`Initializer`]. During boot the initializer
//! receives a [`UnitContext`] and returns a [`Runner`]; runners start only
//! once every unit has initialized.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Span;

use crate::app::AppContext;
use crate::config::{ConfigStore, Validate};
use crate::error::{BoxError, ConfigResult};

/// Exit code used when a run future panics.
pub const EXIT_PANICKED: i32 = -1;
/// Exit code used when a unit is abandoned after its shutdown deadline.
pub const EXIT_ABANDONED: i32 = -2;

/// Outcome of a unit's run future.
///
/// Only code 0 without an error is a clean exit.
#[derive(Debug)]
pub struct ExitResult {
    pub code: i32,
    pub error: Option<BoxError>,
}

impl ExitResult {
    /// Code 0, no error.
    pub fn success() -> Self {
        Self {
            code: 0,
            error: None,
        }
    }

    /// Exit with `code` and an error.
    pub fn failure(code: i32, error: impl Into<BoxError>) -> Self {
        Self {
            code,
            error: Some(error.into()),
        }
    }

    /// True for code 0 without an error.
    pub fn is_clean(&self) -> bool {
        self.code == 0 && self.error.is_none()
    }
}

impl<E: Into<BoxError>> From<Result<(), E>> for ExitResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => Self::failure(1, e),
        }
    }
}

/// The run half of a unit, produced by its initializer.
pub struct Runner {
    future: Option<BoxFuture<'static, ExitResult>>,
}

impl Runner {
    /// Run `future` concurrently with the other units.
    ///
    /// The future should watch [`UnitContext::cancelled`] and return promptly.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ExitResult> + Send + 'static,
    {
        Self {
            future: Some(future.boxed()),
        }
    }

    /// No work of its own: wait for cancellation, then exit cleanly.
    pub fn idle() -> Self {
        Self { future: None }
    }

    /// True for runners built with [`Runner::idle`].
    pub fn is_idle(&self) -> bool {
        self.future.is_none()
    }

    pub(crate) fn into_future(self, ctx: UnitContext) -> BoxFuture<'static, ExitResult> {
        match self.future {
            Some(future) => future,
            None => async move {
                ctx.cancelled().await;
                ExitResult::success()
            }
            .boxed(),
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("idle", &self.is_idle())
            .finish()
    }
}

/// Initializes a unit. Failing here aborts the whole boot.
#[async_trait]
pub trait Initializer: Send + 'static {
    async fn init(self: Box<Self>, ctx: UnitContext) -> Result<Runner, BoxError>;
}

struct FnInitializer<F>(F);

#[async_trait]
impl<F, Fut> Initializer for FnInitializer<F>
where
    F: FnOnce(UnitContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Runner, BoxError>> + Send + 'static,
{
    async fn init(self: Box<Self>, ctx: UnitContext) -> Result<Runner, BoxError> {
        (self.0)(ctx).await
    }
}

/// A unit as registered: name, declared dependencies and initializer.
pub struct UnitSpec {
    name: String,
    dependencies: Vec<String>,
    initializer: Box<dyn Initializer>,
}

impl UnitSpec {
    /// Create a unit from an async closure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use unitboot::{ExitResult, Runner, UnitSpec};
    ///
    /// let spec = UnitSpec::new("web", |ctx| async move {
    ///     Ok(Runner::new(async move {
    ///         ctx.cancelled().await;
    ///         ExitResult::success()
    ///     }))
    /// })
    /// .depends_on(["db"]);
    ///
    /// assert_eq!(spec.dependencies(), ["db".to_string()]);
    /// ```
    pub fn new<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: FnOnce(UnitContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Runner, BoxError>> + Send + 'static,
    {
        Self::from_initializer(name, FnInitializer(init))
    }

    /// Create a unit from a type implementing [`Initializer`].
    pub fn from_initializer(name: impl Into<String>, initializer: impl Initializer) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            initializer: Box::new(initializer),
        }
    }

    /// Declare units that must initialize before this one.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units this one depends on, as declared.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn into_parts(self) -> (String, Box<dyn Initializer>) {
        (self.name, self.initializer)
    }
}

impl fmt::Debug for UnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Handle given to a unit's initializer, and usually captured by its runner.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct UnitContext {
    inner: Arc<UnitInner>,
}

struct UnitInner {
    name: String,
    app: Arc<AppContext>,
    token: CancellationToken,
    span: Span,
}

impl UnitContext {
    pub(crate) fn new(
        name: String,
        app: Arc<AppContext>,
        token: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                name,
                app,
                token,
                span,
            }),
        }
    }

    /// Name of the unit this handle belongs to.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The root application context.
    pub fn app(&self) -> &Arc<AppContext> {
        &self.inner.app
    }

    /// The merged configuration store.
    pub fn config(&self) -> &ConfigStore {
        self.inner.app.config()
    }

    /// This unit's lifetime.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Resolves when this unit is asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Whether this unit has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Span tagged with this unit's name; init and run are instrumented with it.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Decode and validate the config subsection under `key`.
    pub fn decode_config<T>(&self, key: &str) -> ConfigResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        self.config().decode(key)
    }

    /// Ask the whole application to shut down.
    pub fn shutdown(&self, reason: impl fmt::Display) {
        self.inner.app.shutdown(format!("unit '{}': {reason}", self.inner.name));
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("name", &self.inner.name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
