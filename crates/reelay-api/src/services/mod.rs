pub mod intake;

pub use intake::{IntakeConfig, IntakeOutcome, IntakeRequest, IntakeResponse, IntakeService};
