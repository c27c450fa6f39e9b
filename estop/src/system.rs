//! The handle every task and hook runs against.

use core::fmt::{self, Write};

use estop_sync::ResourceGuard;
use estop_time::Monotonic;
use heapless::String;

use crate::board::Board;
use crate::config::{Timing, LOG_LINE_CAPACITY};
use crate::context::SharedContext;
use crate::task::TaskId;

/// One formatted log line.
pub type LogLine = String<LOG_LINE_CAPACITY>;

/// Shared context, clock, board and timing, bundled for the tasks.
///
/// Cheap to copy; each task gets its own copy.
pub struct System<'a, M, B> {
    ctx: &'a SharedContext,
    mono: &'a M,
    board: &'a B,
    timing: Timing,
}

impl<M, B> Clone for System<'_, M, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, B> Copy for System<'_, M, B> {}

impl<'a, M: Monotonic, B: Board> System<'a, M, B> {
    /// Bundle the collaborators of one system.
    pub fn new(ctx: &'a SharedContext, mono: &'a M, board: &'a B, timing: Timing) -> Self {
        Self {
            ctx,
            mono,
            board,
            timing,
        }
    }

    /// The shared context.
    pub fn ctx(&self) -> &'a SharedContext {
        self.ctx
    }

    /// The time source.
    pub fn mono(&self) -> &'a M {
        self.mono
    }

    /// The board.
    pub fn board(&self) -> &'a B {
        self.board
    }

    /// Intervals and counts in effect.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Take the output channel for `owner`, waiting as long as it takes.
    ///
    /// The channel is given back when the returned session is dropped.
    pub async fn output(&self, owner: TaskId) -> OutputSession<'a, B> {
        let guard = self.ctx.output_guard();
        guard.lock(owner).await;

        OutputSession {
            guard,
            board: self.board,
            owner,
        }
    }

    /// Write a line straight to the board, bypassing the output guard.
    ///
    /// Only for contexts that may not suspend.
    pub(crate) fn log_direct(&self, args: fmt::Arguments<'_>) {
        self.board.write_log(&format_line(args));
    }
}

/// Exclusive use of the output channel.
pub struct OutputSession<'a, B: Board> {
    guard: &'a ResourceGuard<(), TaskId>,
    board: &'a B,
    owner: TaskId,
}

impl<B: Board> OutputSession<'_, B> {
    /// Write one formatted line.
    pub fn line(&self, args: fmt::Arguments<'_>) {
        self.board.write_log(&format_line(args));
    }
}

impl<B: Board> Drop for OutputSession<'_, B> {
    fn drop(&mut self) {
        // The session is the holder for its whole lifetime.
        let _ = self.guard.release(self.owner);
    }
}

/// Format `args` into a fixed-capacity line, cutting it at the capacity.
pub fn format_line(args: fmt::Arguments<'_>) -> LogLine {
    let mut line = LogLine::new();
    let _ = Truncating(&mut line).write_fmt(args);
    line
}

struct Truncating<'s>(&'s mut LogLine);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}
