//! Runs each linked element in its own thread.

use crate::error::ElementError;
use crate::pipeline::element::{ElementContext, ElementHandle, Flow};
use crate::pipeline::types::ElementStatus;
use std::io;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskCommand {
    Run,
    Pause,
    Stop,
}

/// Run/pause/stop signal shared between the control thread and one element task.
#[derive(Debug)]
pub(crate) struct TaskControl {
    command: Mutex<TaskCommand>,
    changed: Condvar,
}

impl TaskControl {
    pub(crate) fn new() -> Self {
        Self {
            command: Mutex::new(TaskCommand::Run),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn pause(&self) {
        self.set(TaskCommand::Pause);
    }

    pub(crate) fn resume(&self) {
        self.set(TaskCommand::Run);
    }

    pub(crate) fn stop(&self) {
        self.set(TaskCommand::Stop);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        *self.lock() == TaskCommand::Stop
    }

    /// Blocks while paused. Returns false once the task must stop.
    fn wait_runnable(&self) -> bool {
        let mut command = self.lock();
        while *command == TaskCommand::Pause {
            command = self
                .changed
                .wait(command)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *command == TaskCommand::Run
    }

    fn set(&self, next: TaskCommand) {
        let mut command = self.lock();
        // Stop is final for this task.
        if *command != TaskCommand::Stop {
            *command = next;
        }
        self.changed.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskCommand> {
        self.command.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running element task.
pub(crate) struct ElementRunner {
    /// Handle to the spawned thread.
    handle: Option<JoinHandle<()>>,
    /// Link tag of the element, for diagnostics.
    name: &'static str,
}

impl ElementRunner {
    /// Spawns the task for `element`, driving it with `ctx`.
    pub(crate) fn spawn(element: ElementHandle, ctx: ElementContext) -> io::Result<Self> {
        let name = element.role().tag();
        let handle = thread::Builder::new()
            .name(format!("element-{name}"))
            .spawn(move || Self::run_element(element, ctx))?;

        Ok(Self {
            handle: Some(handle),
            name,
        })
    }

    /// Main processing loop for the element.
    fn run_element(element: ElementHandle, mut ctx: ElementContext) {
        let name = element.role().tag();
        debug!(element = name, kind = element.kind(), "element task started");

        element.lock().on_start();

        let mut status = loop {
            if !ctx.control().wait_runnable() {
                break ElementStatus::Stopped;
            }

            let result = element.lock().process(&mut ctx);
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => break ElementStatus::Finished,
                Err(ElementError::Recoverable(msg)) => {
                    warn!(element = name, "{msg}");
                }
                Err(ElementError::Fatal(msg)) => {
                    error!(element = name, "{msg}");
                    break ElementStatus::Error;
                }
            }
        };

        // An element that ran out of input because upstream was stopped was stopped too.
        if status == ElementStatus::Finished && ctx.should_stop() {
            status = ElementStatus::Stopped;
        }

        ctx.close_output();
        element.lock().on_stop();
        ctx.report_status(status);
        debug!(element = name, ?status, "element task exited");
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the task thread to complete.
    pub(crate) fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Element '{}' task panicked", self.name))
        } else {
            Ok(())
        }
    }
}
