//! Linear stack of compensating actions for multi-step setup paths.
//!
//! Each successful setup step pushes the action that undoes it. If the
//! sequence reaches its committed state the stack is disarmed with
//! [`Rollback::commit`]; otherwise the actions run in reverse push order,
//! either explicitly through [`Rollback::unwind`] or implicitly when the
//! stack is dropped (for example when `?` returns early).
//!
//! ```
//! use boxwood_common::rollback::Rollback;
//!
//! let mut undo = Rollback::new("example");
//! undo.push("release thing", || Ok(()));
//! // ... further steps; an early `return Err(..)` here unwinds `undo` ...
//! undo.commit();
//! ```

use crate::error::{BoxError, Result};

type Action<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Reverse-order compensating action stack.
#[must_use = "dropping a Rollback immediately runs every pushed action"]
pub struct Rollback<'a> {
    operation: &'static str,
    steps: Vec<(String, Action<'a>)>,
}

impl<'a> Rollback<'a> {
    /// Creates an empty stack for the named operation.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    /// Pushes the action that undoes the step that just succeeded.
    pub fn push(&mut self, label: impl Into<String>, action: impl FnOnce() -> Result<()> + 'a) {
        self.steps.push((label.into(), Box::new(action)));
    }

    /// Number of pending compensating actions.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if nothing would be undone.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Marks the operation as committed and discards every pending action.
    pub fn commit(mut self) {
        tracing::debug!(
            operation = self.operation,
            steps = self.steps.len(),
            "rollback disarmed"
        );
        self.steps.clear();
    }

    /// Runs every pending action in reverse order.
    ///
    /// All actions run even if some fail.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Cleanup`] listing every failed action.
    pub fn unwind(mut self) -> Result<()> {
        self.run()
    }

    fn run(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        while let Some((label, action)) = self.steps.pop() {
            match action() {
                Ok(()) => tracing::debug!(operation = self.operation, step = %label, "rolled back"),
                Err(e) => {
                    tracing::warn!(
                        operation = self.operation,
                        step = %label,
                        error = %e,
                        "rollback step failed"
                    );
                    failures.push(BoxError::step(label, e));
                }
            }
        }
        BoxError::check_cleanup(failures)
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        tracing::info!(
            operation = self.operation,
            steps = self.steps.len(),
            "operation did not complete, rolling back"
        );
        if let Err(e) = self.run() {
            tracing::error!(operation = self.operation, error = %e, "rollback incomplete");
        }
    }
}

impl std::fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("operation", &self.operation)
            .field(
                "steps",
                &self.steps.iter().map(|(label, _)| label).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn unwind_runs_actions_in_reverse_order() {
        let log = RefCell::new(Vec::new());
        let mut undo = Rollback::new("test");
        undo.push("first", || {
            log.borrow_mut().push("first");
            Ok(())
        });
        undo.push("second", || {
            log.borrow_mut().push("second");
            Ok(())
        });
        undo.unwind().expect("unwind");
        assert_eq!(*log.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn commit_discards_actions() {
        let ran = RefCell::new(false);
        {
            let mut undo = Rollback::new("test");
            undo.push("flag", || {
                *ran.borrow_mut() = true;
                Ok(())
            });
            undo.commit();
        }
        assert!(!*ran.borrow());
    }

    #[test]
    fn drop_without_commit_unwinds() {
        let ran = RefCell::new(false);
        {
            let mut undo = Rollback::new("test");
            undo.push("flag", || {
                *ran.borrow_mut() = true;
                Ok(())
            });
        }
        assert!(*ran.borrow());
    }

    #[test]
    fn failing_action_does_not_stop_the_rest() {
        let log = RefCell::new(Vec::new());
        let mut undo = Rollback::new("test");
        undo.push("kept", || {
            log.borrow_mut().push("kept");
            Ok(())
        });
        undo.push("broken", || {
            Err(BoxError::Config {
                message: "boom".into(),
            })
        });
        let err = undo.unwind().unwrap_err();
        assert!(err.to_string().contains("broken: invalid configuration: boom"));
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn failed_step_keeps_its_error_kind() {
        let mut undo = Rollback::new("test");
        undo.push("delete bridge", || {
            Err(BoxError::Netlink {
                message: "no such device".into(),
            })
        });
        let err = undo.unwind().unwrap_err();
        let BoxError::Cleanup { failures } = &err else {
            panic!("expected cleanup error, got {err}");
        };
        assert!(matches!(
            &failures[..],
            [BoxError::Step { label, source }]
                if label == "delete bridge" && matches!(**source, BoxError::Netlink { .. })
        ));
        assert!(!err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn early_return_through_question_mark_unwinds() {
        fn step_two() -> Result<()> {
            Err(BoxError::Config {
                message: "step two failed".into(),
            })
        }

        fn setup(log: &RefCell<Vec<&'static str>>) -> Result<()> {
            let mut undo = Rollback::new("test");
            undo.push("step one", || {
                log.borrow_mut().push("undo one");
                Ok(())
            });
            step_two()?;
            undo.commit();
            Ok(())
        }

        let log = RefCell::new(Vec::new());
        assert!(setup(&log).is_err());
        assert_eq!(*log.borrow(), vec!["undo one"]);
    }
}
