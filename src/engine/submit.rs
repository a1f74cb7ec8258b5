//! Submission, playlist/channel expansion and duplicate suppression.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::DownloadEngine;
use super::queue::QueuedTask;
use crate::error::{Error, Result};
use crate::fetch::ListRequest;
use crate::range::RangeSpec;
use crate::task::Task;
use crate::types::{EnumerationError, Event, Priority, SubmitOutcome, TaskId, TaskOptions};

/// Concurrent history lookups while deduplicating a playlist
const DUPLICATE_CHECK_CONCURRENCY: usize = 8;

/// A target about to become a task
#[derive(Debug)]
struct Candidate {
    target: String,
    title: Option<String>,
}

/// Check that a target is an absolute http(s) URL
pub(crate) fn validate_target(target: &str) -> Result<String> {
    let trimmed = target.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| Error::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(trimmed.to_string()),
        "http" | "https" => Err(Error::InvalidTarget {
            target: target.to_string(),
            reason: "missing host".to_string(),
        }),
        scheme => Err(Error::InvalidTarget {
            target: target.to_string(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

impl DownloadEngine {
    /// Submit a single target
    ///
    /// Validation failures (malformed target, priority outside 1–10, engine shutting
    /// down) are returned before any task exists. With duplicate skipping enabled, a
    /// target that history reports as completed creates no task (`skipped = 1`); a
    /// target already in flight is merged into the existing task (`coalesced`).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use vidqueue::{Config, DownloadEngine};
    /// # use vidqueue::types::{FormatSelector, TaskOptions};
    /// # async fn example(engine: DownloadEngine) -> vidqueue::Result<()> {
    /// let options = TaskOptions {
    ///     format: Some(FormatSelector::MaxHeight(720)),
    ///     ..Default::default()
    /// };
    /// let outcome = engine
    ///     .submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ", 8, options)
    ///     .await?;
    /// assert_eq!(outcome.created.len() + outcome.skipped, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(
        &self,
        target: &str,
        priority: i32,
        options: TaskOptions,
    ) -> Result<SubmitOutcome> {
        self.ensure_accepting()?;
        let target = validate_target(target)?;
        let priority = Priority::new(priority)?;
        let options = Arc::new(options.resolve(&self.config.download));

        let mut outcome = SubmitOutcome::default();
        let candidates = vec![Candidate {
            target,
            title: None,
        }];
        self.admit(candidates, priority, options, &mut outcome)
            .await?;
        Ok(outcome)
    }

    /// Expand a playlist or channel into one task per member
    ///
    /// The listing collaborator runs without the state lock held. Members that cannot
    /// be enumerated are reported in `enumeration_errors` and skipped; the call only
    /// fails when the container itself cannot be read.
    pub async fn submit_batch(
        &self,
        container: &str,
        priority: i32,
        options: TaskOptions,
        range: Option<RangeSpec>,
    ) -> Result<SubmitOutcome> {
        self.ensure_accepting()?;
        let container = validate_target(container)?;
        let priority = Priority::new(priority)?;
        let options = Arc::new(options.resolve(&self.config.download));

        tracing::debug!(container = %container, range = ?range.as_ref().map(ToString::to_string), "Enumerating container");

        let listing = self
            .collaborators
            .lister
            .list_members(ListRequest {
                target: container.clone(),
                range: range.clone(),
                cancel: self.pool.shutdown.child_token(),
            })
            .await
            .map_err(|e| {
                tracing::warn!(container = %container, error = %e, "Failed to enumerate container");
                Error::Fetch(e)
            })?;

        let mut outcome = SubmitOutcome::default();
        for error in listing.errors {
            self.record_enumeration_error(&container, error, &mut outcome);
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(listing.members.len());
        for member in listing.members {
            // Only a reported position can be checked; unnumbered members were
            // already selected by the lister
            if let (Some(range), Some(index)) = (range.as_ref(), member.index)
                && !range.contains(index)
            {
                continue;
            }
            let target = match validate_target(&member.target) {
                Ok(target) => target,
                Err(e) => {
                    let error = EnumerationError {
                        index: member.index,
                        target: Some(member.target),
                        message: e.to_string(),
                    };
                    self.record_enumeration_error(&container, error, &mut outcome);
                    continue;
                }
            };
            // Same video listed twice in one container
            if !seen.insert(target.clone()) {
                outcome.skipped += 1;
                continue;
            }
            candidates.push(Candidate {
                target,
                title: member.title,
            });
        }

        tracing::info!(
            container = %container,
            members = candidates.len(),
            enumeration_errors = outcome.enumeration_errors.len(),
            "Container enumerated"
        );

        self.admit(candidates, priority, options, &mut outcome)
            .await?;
        Ok(outcome)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.pool.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    fn record_enumeration_error(
        &self,
        container: &str,
        error: EnumerationError,
        outcome: &mut SubmitOutcome,
    ) {
        tracing::warn!(
            container = %container,
            index = ?error.index,
            error = %error.message,
            "Skipping member that could not be enumerated"
        );
        self.emit_event(Event::EnumerationFailed {
            container: container.to_string(),
            index: error.index,
            error: error.message.clone(),
        });
        outcome.enumeration_errors.push(error);
    }

    /// Whether history already has a successful download of `target`
    ///
    /// A failing history lookup admits the target rather than dropping work.
    async fn is_recorded(&self, target: &str) -> bool {
        match self.collaborators.history.is_duplicate(target).await {
            Ok(duplicate) => duplicate,
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "Duplicate check failed; admitting target");
                false
            }
        }
    }

    /// Drop duplicates, coalesce in-flight targets, then enqueue the rest in one lock
    async fn admit(
        &self,
        candidates: Vec<Candidate>,
        priority: Priority,
        options: Arc<TaskOptions>,
        outcome: &mut SubmitOutcome,
    ) -> Result<()> {
        let fresh: Vec<Candidate> = if self.config.duplicates.skip_duplicates {
            let checked: Vec<(Candidate, bool)> = futures::stream::iter(candidates)
                .map(|candidate| async move {
                    let duplicate = self.is_recorded(&candidate.target).await;
                    (candidate, duplicate)
                })
                .buffered(DUPLICATE_CHECK_CONCURRENCY)
                .collect()
                .await;

            let mut fresh = Vec::with_capacity(checked.len());
            for (candidate, duplicate) in checked {
                if duplicate {
                    tracing::info!(url = %candidate.target, "Skipping previously downloaded target");
                    self.emit_event(Event::DuplicateSkipped {
                        target: candidate.target,
                    });
                    outcome.skipped += 1;
                } else {
                    fresh.push(candidate);
                }
            }
            fresh
        } else {
            candidates
        };

        let queued = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            // Shutdown may have begun while history was being consulted
            if !self.pool.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }

            let mut entries = Vec::with_capacity(fresh.len());
            for candidate in fresh {
                if let Some(existing) = state.in_flight(&candidate.target) {
                    tracing::debug!(url = %candidate.target, task_id = %existing, "Coalesced with in-flight task");
                    outcome.skipped += 1;
                    outcome.coalesced.push(existing);
                    continue;
                }

                let id = TaskId::new();
                let seq = state.next_seq;
                state.next_seq += 1;

                let task = Task::new(
                    id,
                    candidate.target.clone(),
                    candidate.title,
                    priority,
                    Arc::clone(&options),
                    seq,
                );
                state.targets.insert(candidate.target.clone(), id);
                state.tasks.insert(id, task);
                entries.push(QueuedTask { id, priority, seq });

                self.emit_event(Event::Queued {
                    id,
                    target: candidate.target,
                    priority,
                });
                outcome.created.push(id);
            }

            let queued = entries.len();
            state.queue.extend(entries);
            queued
        };

        if queued > 0 {
            tracing::debug!(queued, priority = %priority, "Tasks queued");
            self.notify_workers();
        }
        Ok(())
    }
}
