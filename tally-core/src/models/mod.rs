pub mod record;

pub use record::{field, InvoiceRecord};
