pub mod adapters;
pub mod controller;
pub mod entitlement;
pub mod mock;
pub mod orchestrator;
pub mod request;
pub mod validation;
pub mod wire;

pub use adapters::{Adapters, CardAdapter, PaymentMethodAdapter, YapeAdapter};
pub use controller::{
    CardDonationController, ControllerOutcome, OrchestratorEndpoint, RentalController,
    YapeDonationController,
};
pub use entitlement::EntitlementRecorder;
pub use orchestrator::{
    EntitlementOutcome, OrchestratorSettings, PaymentOrchestrator, PaymentOutcome,
    PaymentReceipt,
};
pub use request::{PaymentFlow, PaymentInstrument, PaymentRequest};
