//! Approved outbound templates.
//!
//! Some channels only allow pre-approved message shapes outside a live
//! session. [`TemplateRegistry`] finds the template for an agent and
//! locale, [`derive_parameters`] fills its placeholders from the agent's
//! reply, and [`Delivery`] says whether to send the template or fall
//! back to free text.

pub mod derive;
pub mod registry;

pub use derive::{TemplateInputs, derive_parameters, sanitize_body};
pub use registry::{ApprovedTemplate, Delivery, TemplateError, TemplateRegistry, TemplateSource};
