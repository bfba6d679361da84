//! Commands and the continuation they hand their output to.

use crate::context::Context;
use crate::error::CommandError;
use blocktree_types::ErrorChannel;
use std::any::Any;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::debug;

/// One step of a chain.
///
/// A command reads what it needs from `ctx` and either calls `next` to
/// continue the chain with its output merged in, or returns without calling
/// it to stop the chain. Returning `Err` (or panicking) also stops the chain
/// and fails the run.
pub trait Command: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()>;
}

/// A command built from a closure. See [`from_fn`].
pub struct FnCommand<F> {
    name: &'static str,
    f: F,
}

/// Wraps a closure as a named [`Command`].
pub fn from_fn<F>(name: &'static str, f: F) -> FnCommand<F>
where
    F: Fn(&Context, Next<'_>) -> anyhow::Result<()> + Send + Sync,
{
    FnCommand { name, f }
}

impl<F> Command for FnCommand<F>
where
    F: Fn(&Context, Next<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        (self.f)(ctx, next)
    }
}

pub(crate) type Step = Arc<dyn Command>;

/// Continuation handed to a [`Command`]. Consumed by the call, so a command
/// continues its chain at most once.
pub struct Next<'a> {
    ctx: &'a Context,
    rest: &'a [Step],
    run: &'a RunState<'a>,
    out: &'a mut Option<Context>,
}

impl<'a> Next<'a> {
    /// Continues the chain without adding output.
    pub fn call(self) {
        self.with(Context::new());
    }

    /// Continues the chain with `output` merged over the current context.
    /// Returns once the rest of the chain has run.
    pub fn with(self, output: Context) {
        let ctx = self.ctx.merged(output);
        *self.out = Some(run_steps(ctx, self.rest, self.run));
    }

    pub(crate) fn errors(&self) -> &'a ErrorChannel<CommandError> {
        self.run.errors()
    }
}

/// Bookkeeping of one `run()`: whether the end of the chain was reached
/// and whether any step failed on the way.
pub(crate) struct RunState<'a> {
    completed: Cell<bool>,
    failed: Cell<bool>,
    errors: &'a ErrorChannel<CommandError>,
}

impl<'a> RunState<'a> {
    pub(crate) fn new(errors: &'a ErrorChannel<CommandError>) -> Self {
        Self {
            completed: Cell::new(false),
            failed: Cell::new(false),
            errors,
        }
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.completed.get() && !self.failed.get()
    }

    pub(crate) fn errors(&self) -> &'a ErrorChannel<CommandError> {
        self.errors
    }

    fn fail(&self, error: CommandError) {
        self.failed.set(true);
        self.errors.report(error);
    }
}

/// Runs `steps` in order from `ctx` and returns the context as it was when
/// the chain stopped. Reaching the end of `steps` completes the run.
pub(crate) fn run_steps(ctx: Context, steps: &[Step], run: &RunState<'_>) -> Context {
    let Some((step, rest)) = steps.split_first() else {
        run.completed.set(true);
        return ctx;
    };

    let mut out = None;
    let result = {
        let next = Next {
            ctx: &ctx,
            rest,
            run,
            out: &mut out,
        };
        catch_unwind(AssertUnwindSafe(|| step.run(&ctx, next)))
    };

    match result {
        Ok(Ok(())) => {
            if out.is_none() {
                debug!(command = step.name(), "chain stopped");
            }
        }
        Ok(Err(source)) => run.fail(CommandError::Failed {
            command: step.name().to_owned(),
            source,
        }),
        Err(payload) => run.fail(CommandError::Panicked {
            command: step.name().to_owned(),
            message: panic_message(payload.as_ref()),
        }),
    }
    out.unwrap_or(ctx)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
