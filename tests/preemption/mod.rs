//! Step definitions, fixtures and scenarios for preemption recovery.

mod bdd_steps;
mod scenarios;
mod test_helpers;
