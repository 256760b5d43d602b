//! Domain models for mirrored mail

mod attachment;
mod clobber;
mod message;

use std::collections::HashMap;

pub use attachment::{
    Attachment, AttachmentPart, AttachmentSource, StoredAttachment, alternate_filename,
};
pub use clobber::{ClobberField, ClobberSet, UnknownClobberField};
pub use message::{EmailAddress, ParsedMessage, ParsedMessageBuilder, Recipients, StoredMessage};

/// Backend label/folder id -> display name
pub type LabelCatalog = HashMap<String, String>;
