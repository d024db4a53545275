//! Attribution-aware merging of extraction results into investment records.

pub mod attribution;
pub mod engine;
pub mod error;
pub mod investment;
pub mod normalizer;
pub mod packet;
pub mod store;

pub use attribution::{Attribution, FieldHistory, Offer, SourceType};
pub use engine::{MergeEngine, MergeReport, MergeSource};
pub use error::{MergeError, StoreError};
pub use investment::{DocumentLink, FieldView, Investment, InvestmentView, ValueView};
pub use normalizer::{Identity, IdentityMatcher};
pub use store::InvestmentStore;
