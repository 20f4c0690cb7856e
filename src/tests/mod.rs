//! Cross-crate tests: events written through the ingest side become visible
//! as growth and pages on the read side.
