//! Participant identity: enrollment against the study server and the
//! persisted result that later runs sign and encrypt with.

pub mod enroll;
pub mod store;

pub use enroll::{EnrollResponse, EnrollmentClient, EnrollmentSecret};
pub use store::{load_or_create_identity_key, short_id_for, Identity};
