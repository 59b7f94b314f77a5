//! Card issuance for the keycard kiosk.
//!
//! This crate sequences the hardware components from `keycard-hardware` into
//! a single issuance attempt and exposes it to the kiosk front end.
//!
//! - [`IssuanceOrchestrator`] runs one attempt: validate, open, check, move,
//!   detect, encode, dispense, eject. On failure it retains the card and
//!   always releases both device handles.
//! - [`IssuanceStateMachine`] records the attempt's progress.
//! - [`IssuanceService`] serializes requests and shapes the JSON response.
//! - [`config`] loads the kiosk configuration.
//!
//! # Examples
//!
//! ```no_run
//! use keycard_issuer::config::load_default_config;
//! use keycard_issuer::{IssuanceOrchestrator, IssuanceService, IssueRequest, backend};
//! use keycard_hardware::AnyClock;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_default_config()?;
//! let links = backend::open_links(&config)?;
//! let orchestrator = IssuanceOrchestrator::from_config(&config, links, AnyClock::default())?;
//! let service = IssuanceService::new(orchestrator);
//!
//! let response = service.issue(&IssueRequest::new("00112233445566778899AABBCCDDEEFF")).await;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod result;
pub mod service;
pub mod state_machine;

pub use error::{IssuanceError, IssuancePhase};
pub use orchestrator::{HealthReport, IssuanceOrchestrator};
pub use request::IssueRequest;
pub use result::{CardData, IssuanceResult, IssuanceSuccess, IssueResponse};
pub use service::IssuanceService;
pub use state_machine::{IssuanceState, IssuanceStateMachine, StateTransition};
