//! Entry point for building and running command chains.

use crate::chain::Chain;
use crate::command::Command;
use crate::context::Context;
use crate::error::CommandError;
use crate::scope::{BlockStdScope, ScopeInner};
use blocktree_types::ErrorChannel;
use std::fmt;
use std::sync::Weak;

/// Builds chains whose runs are seeded with the owning [`BlockStdScope`].
///
/// Failures inside commands never escape a run: they turn it into
/// `success = false` and are published on [`CommandManager::errors`].
pub struct CommandManager {
    scope: Weak<ScopeInner>,
    errors: ErrorChannel<CommandError>,
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandManager")
            .field("scoped", &(self.scope.strong_count() > 0))
            .finish()
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandManager {
    /// A manager with no std scope; its contexts start empty.
    #[must_use]
    pub fn new() -> Self {
        Self::scoped(Weak::new())
    }

    pub(crate) fn scoped(scope: Weak<ScopeInner>) -> Self {
        Self {
            scope,
            errors: ErrorChannel::new("command"),
        }
    }

    /// Failures of commands run by this manager.
    pub fn errors(&self) -> &ErrorChannel<CommandError> {
        &self.errors
    }

    pub fn chain(&self) -> Chain<'_> {
        Chain::new(self)
    }

    /// Runs `command` alone, with `input` merged over the seed context.
    pub fn exec(&self, command: impl Command + 'static, input: Option<Context>) -> (bool, Context) {
        let chain = match input {
            Some(input) => self.chain().pipe_with(command, input),
            None => self.chain().pipe(command),
        };
        chain.run()
    }

    pub(crate) fn seed(&self) -> Context {
        Context::seeded(self.scope.upgrade().map(BlockStdScope::from_inner))
    }
}
