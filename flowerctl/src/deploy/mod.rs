//! Deployment building blocks: run state machine, app provisioning and the
//! post-install health check

pub mod fsm;
pub mod health;
pub mod venv;
