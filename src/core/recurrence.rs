//! Next-occurrence computation and recurrence instance spawning.

use chrono::{DateTime, Duration, Months, Utc};

use crate::config::{EngineConfig, RecurrenceUnit};
use crate::id::TaskId;
use crate::types::{Recurrence, RecurrenceKind, Task, TaskStatus};

/// Caller-supplied spacing for `Custom` recurrence.
pub trait IntervalResolver: Send + Sync {
    /// The date `interval` units after `from`, or `None` if unrepresentable.
    fn advance(&self, from: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>>;
}

impl IntervalResolver for RecurrenceUnit {
    fn advance(&self, from: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceUnit::Day => from.checked_add_signed(Duration::days(i64::from(interval))),
            RecurrenceUnit::Week => from.checked_add_signed(Duration::weeks(i64::from(interval))),
            RecurrenceUnit::Month => from.checked_add_months(Months::new(interval)),
            RecurrenceUnit::Year => from.checked_add_months(Months::new(interval.checked_mul(12)?)),
        }
    }
}

#[derive(Default)]
pub struct RecurrenceEngine {
    custom_unit: Option<RecurrenceUnit>,
    resolver: Option<Box<dyn IntervalResolver>>,
}

impl RecurrenceEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            custom_unit: config.custom_recurrence_unit,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn IntervalResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Later of the pattern start and the task's own schedule (scheduled
    /// start, else due date).
    pub fn reference_date(task: &Task, pattern: &Recurrence) -> DateTime<Utc> {
        match task.scheduled_start.or(task.due_at) {
            Some(own) if own > pattern.start_date => own,
            _ => pattern.start_date,
        }
    }

    pub fn advance(&self, pattern: &Recurrence, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let unit = match pattern.kind {
            RecurrenceKind::Daily => RecurrenceUnit::Day,
            RecurrenceKind::Weekly => RecurrenceUnit::Week,
            RecurrenceKind::Monthly => RecurrenceUnit::Month,
            RecurrenceKind::Yearly => RecurrenceUnit::Year,
            RecurrenceKind::Custom => {
                if let Some(resolver) = &self.resolver {
                    return resolver.advance(from, pattern.interval);
                }
                self.custom_unit.unwrap_or(RecurrenceUnit::Day)
            }
        };
        unit.advance(from, pattern.interval)
    }

    /// The instance that follows `task` once it completes, or `None` when the
    /// task does not recur or the next start lies past the end date.
    pub fn next_instance(&self, task: &Task, now: DateTime<Utc>) -> Option<Task> {
        let pattern = task.recurrence.as_ref()?;
        let reference = Self::reference_date(task, pattern);
        let next_start = self.advance(pattern, reference)?;

        // Only a start strictly after the end date closes the series.
        if pattern.end_date.is_some_and(|end| next_start > end) {
            return None;
        }

        let offset = next_start - reference;
        let shift = |value: Option<DateTime<Utc>>| value.and_then(|dt| dt.checked_add_signed(offset));

        Some(Task {
            id: TaskId::new(),
            parent_id: task.parent_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: TaskStatus::Todo,
            priority: task.priority,
            due_at: shift(task.due_at),
            estimated_duration_minutes: task.estimated_duration_minutes,
            allow_parent_auto_complete: task.allow_parent_auto_complete,
            scheduled_start: shift(task.scheduled_start),
            scheduled_end: shift(task.scheduled_end),
            recurrence: Some(Recurrence {
                start_date: next_start,
                ..pattern.clone()
            }),
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
            blocked_by: Vec::new(),
            blocks: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::testutil;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn recurring(kind: RecurrenceKind, interval: u32, start: DateTime<Utc>) -> Task {
        let mut task = testutil::task("Recurring chore");
        task.recurrence = Some(Recurrence {
            kind,
            interval,
            start_date: start,
            end_date: None,
        });
        task
    }

    #[test]
    fn weekly_advances_from_pattern_start() {
        let engine = RecurrenceEngine::default();
        let task = recurring(RecurrenceKind::Weekly, 1, at(2024, 1, 1));

        let next = engine.next_instance(&task, at(2024, 1, 3)).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2024, 1, 8));
        assert_eq!(next.status, TaskStatus::Todo);
        assert_eq!(next.title, "Recurring chore");
        assert_ne!(next.id, task.id);
    }

    #[test]
    fn later_due_date_is_the_reference_and_dates_shift() {
        let engine = RecurrenceEngine::default();
        let mut task = recurring(RecurrenceKind::Daily, 2, at(2024, 1, 1));
        task.due_at = Some(at(2024, 1, 10));
        task.scheduled_end = Some(at(2024, 1, 11));

        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.as_ref().unwrap().start_date, at(2024, 1, 12));
        assert_eq!(next.due_at, Some(at(2024, 1, 12)));
        assert_eq!(next.scheduled_end, Some(at(2024, 1, 13)));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let engine = RecurrenceEngine::default();
        let task = recurring(RecurrenceKind::Monthly, 1, at(2024, 1, 31));

        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2024, 2, 29));
    }

    #[test]
    fn yearly_uses_calendar_years() {
        let engine = RecurrenceEngine::default();
        let task = recurring(RecurrenceKind::Yearly, 2, at(2024, 3, 1));

        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2026, 3, 1));
    }

    #[test]
    fn end_date_stops_the_series() {
        let engine = RecurrenceEngine::default();
        let mut task = recurring(RecurrenceKind::Weekly, 1, at(2024, 1, 1));
        task.recurrence.as_mut().unwrap().end_date = Some(at(2024, 1, 5));
        assert!(engine.next_instance(&task, Utc::now()).is_none());
    }

    #[test]
    fn next_start_on_end_date_still_spawns() {
        let engine = RecurrenceEngine::default();
        let mut task = recurring(RecurrenceKind::Weekly, 1, at(2024, 1, 1));
        task.recurrence.as_mut().unwrap().end_date = Some(at(2024, 1, 8));

        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2024, 1, 8));
    }

    #[test]
    fn custom_without_resolver_falls_back_to_days() {
        let engine = RecurrenceEngine::default();
        let task = recurring(RecurrenceKind::Custom, 3, at(2024, 1, 1));

        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2024, 1, 4));
    }

    #[test]
    fn custom_uses_configured_unit_then_resolver() {
        let config = EngineConfig {
            custom_recurrence_unit: Some(RecurrenceUnit::Month),
            ..EngineConfig::default()
        };
        let task = recurring(RecurrenceKind::Custom, 1, at(2024, 1, 15));

        let engine = RecurrenceEngine::new(&config);
        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2024, 2, 15));

        let engine = RecurrenceEngine::new(&config).with_resolver(Box::new(RecurrenceUnit::Year));
        let next = engine.next_instance(&task, Utc::now()).unwrap();
        assert_eq!(next.recurrence.unwrap().start_date, at(2025, 1, 15));
    }

    #[test]
    fn non_recurring_task_spawns_nothing() {
        let engine = RecurrenceEngine::default();
        assert!(engine.next_instance(&testutil::task("Once"), Utc::now()).is_none());
    }
}
