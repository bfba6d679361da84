//! Fluent chain construction and execution.

use crate::command::{Command, Next, RunState, Step, from_fn, run_steps};
use crate::context::Context;
use crate::manager::CommandManager;
use std::sync::Arc;
use tracing::debug;

/// A pending sequence of commands. Nothing runs until [`Chain::run`].
#[derive(Clone)]
pub struct Chain<'m> {
    manager: &'m CommandManager,
    steps: Vec<Step>,
}

impl<'m> Chain<'m> {
    pub(crate) fn new(manager: &'m CommandManager) -> Self {
        Self {
            manager,
            steps: Vec::new(),
        }
    }

    fn push(mut self, step: impl Command + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends `command`.
    #[must_use]
    pub fn pipe(self, command: impl Command + 'static) -> Self {
        self.push(command)
    }

    /// Appends `command`, which sees `input` merged over the context. The
    /// input is visible to this command only.
    #[must_use]
    pub fn pipe_with(self, command: impl Command + 'static, input: Context) -> Self {
        self.push(WithInput {
            inner: Arc::new(command),
            input,
        })
    }

    /// Appends a step that merges `values` into the context.
    #[must_use]
    pub fn with(self, values: Context) -> Self {
        self.push(from_fn("with", move |_, next| {
            next.with(values.clone());
            Ok(())
        }))
    }

    /// Appends a step that runs the chains built by `branches` one after
    /// another, each from the context as it is before the step. The first
    /// branch that succeeds continues the chain with its output; the
    /// remaining branches are not run. Fails when every branch fails.
    #[must_use]
    pub fn try_any(self, branches: impl FnOnce(&'m CommandManager) -> Vec<Chain<'m>>) -> Self {
        let branches = branches(self.manager).into_iter().map(|c| c.steps).collect();
        self.push(TryAny { branches })
    }

    /// Appends a step that runs every chain built by `branches` in order.
    /// Each successful branch's output is merged into the context the next
    /// branch starts from; failed branches leave no trace. Fails when every
    /// branch fails.
    #[must_use]
    pub fn try_all(self, branches: impl FnOnce(&'m CommandManager) -> Vec<Chain<'m>>) -> Self {
        let branches = branches(self.manager).into_iter().map(|c| c.steps).collect();
        self.push(TryAll { branches })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the chain from a context seeded with the std scope.
    ///
    /// Returns whether the end of the chain was reached without any step
    /// failing, and the context as it was when the chain stopped.
    pub fn run(self) -> (bool, Context) {
        let state = RunState::new(self.manager.errors());
        let ctx = run_steps(self.manager.seed(), &self.steps, &state);
        let success = state.succeeded();
        debug!(steps = self.steps.len(), success, "chain finished");
        (success, ctx)
    }
}

struct WithInput {
    inner: Step,
    input: Context,
}

impl Command for WithInput {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        self.inner.run(&ctx.merged(self.input.clone()), next)
    }
}

struct TryAny {
    branches: Vec<Vec<Step>>,
}

impl Command for TryAny {
    fn name(&self) -> &str {
        "try_any"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        for (i, branch) in self.branches.iter().enumerate() {
            let state = RunState::new(next.errors());
            let out = run_steps(ctx.clone(), branch, &state);
            if state.succeeded() {
                debug!(branch = i, "try_any branch succeeded");
                next.with(out);
                return Ok(());
            }
        }
        Ok(())
    }
}

struct TryAll {
    branches: Vec<Vec<Step>>,
}

impl Command for TryAll {
    fn name(&self) -> &str {
        "try_all"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let mut acc = ctx.clone();
        let mut any = false;
        for branch in &self.branches {
            let state = RunState::new(next.errors());
            let out = run_steps(acc.clone(), branch, &state);
            if state.succeeded() {
                acc = out;
                any = true;
            }
        }
        if any {
            next.with(acc);
        }
        Ok(())
    }
}
