use chrono::Duration;

use crate::{
    error::{Result, SchedulerError},
    schedule::{CalculatorFn, CalculatorKind, ScheduleConfig},
    types::{JobContext, Timestamp},
};

/// Strategy computing a job's next due time, resolved once from its
/// [`ScheduleConfig`] when the job is built.
#[derive(Clone)]
pub enum Calculator {
    /// `start_time` first, then the previous due time plus `every`.
    Interval {
        every: Duration,
        start_time: Timestamp,
    },
    Custom(CalculatorFn),
}

impl Calculator {
    /// Resolve the strategy, failing fast on missing options.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        match config.scheduler {
            CalculatorKind::Interval => {
                let seconds = config
                    .interval
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or_else(|| {
                        SchedulerError::Configuration(
                            "interval scheduler needs a positive `interval` in seconds".into(),
                        )
                    })?;
                let every = Duration::try_milliseconds((seconds * 1000.0).round() as i64)
                    .filter(|d| *d > Duration::zero())
                    .ok_or_else(|| {
                        SchedulerError::Configuration(format!("interval out of range: {seconds}"))
                    })?;
                let start_time = config.start_time.ok_or_else(|| {
                    SchedulerError::Configuration(
                        "interval scheduler needs a `start_time`".into(),
                    )
                })?;
                if start_time.checked_add_signed(every).is_none() {
                    return Err(SchedulerError::Configuration(format!(
                        "interval of {seconds}s overflows the schedule from {start_time}"
                    )));
                }
                Ok(Calculator::Interval { every, start_time })
            }
            CalculatorKind::Custom => config
                .custom_time_scheduler
                .clone()
                .map(Calculator::Custom)
                .ok_or_else(|| {
                    SchedulerError::Configuration(
                        "custom scheduler needs a `custom_time_scheduler` function".into(),
                    )
                }),
        }
    }

    /// Compute the due time following `previous` (`None` before the first
    /// computation).
    ///
    /// The interval strategy advances from the previous *scheduled* time, not
    /// from now, so the cadence never drifts with execution latency.
    pub fn next_run_time(
        &self,
        previous: Option<Timestamp>,
        ctx: &JobContext<'_>,
    ) -> Result<Timestamp> {
        match self {
            Calculator::Interval { every, start_time } => match previous {
                None => Ok(*start_time),
                Some(prev) => prev.checked_add_signed(*every).ok_or_else(|| {
                    SchedulerError::Configuration(format!(
                        "next run time after {prev} is out of range for job {}",
                        ctx.job.name()
                    ))
                }),
            },
            Calculator::Custom(f) => f(ctx).ok_or_else(|| {
                SchedulerError::Configuration(format!(
                    "custom_time_scheduler returned no timestamp for job {}",
                    ctx.job.name()
                ))
            }),
        }
    }
}
