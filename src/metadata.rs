use portage_atom::Slot;

use crate::keyword::Keyword;
use crate::src_uri::SrcUriEntry;

/// The part of an ebuild's cached metadata that the index records.
///
/// `description` and `slot` are mandatory in every cache entry; the other
/// fields are empty when the ebuild leaves them unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbuildMetadata {
    /// Package description.
    pub description: String,

    /// Package slot, with its sub-slot if any.
    pub slot: Slot,

    /// Homepage URL(s).
    pub homepage: Vec<String>,

    /// Source URI expression.
    pub src_uri: Vec<SrcUriEntry>,

    /// `LICENSE` exactly as written in the cache.
    pub license: String,

    /// Architecture keywords.
    pub keywords: Vec<Keyword>,
}
