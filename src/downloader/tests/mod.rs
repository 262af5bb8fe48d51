use super::test_helpers::*;
use super::*;
use crate::error::{Error, JobError};
use crate::fetch::testing::Step;
use crate::types::{Event, JobOptions, Stage, Status, Strategy};
use std::time::Duration;

mod queue;

/// Generous upper bound for a job to settle in tests
const SETTLE: Duration = Duration::from_secs(10);
