//! Enumerable table of every record type.
//!
//! Operations that apply "for each record type" iterate this table in tag
//! order and dispatch through the descriptor's function pointers.

use super::control::{
    CacheReset, Channel, ChannelRequest, Deregister, Register, RequestCached, RequestCachedDone,
    TradingDay,
};
use super::trading::{Asset, Commission, Instrument, Order, OrderInput, Position, Quote, Trade};
use super::{ProfileRecord, Record, RecordKind};
use crate::journal::error::JournalError;
use crate::journal::location::Location;
use std::collections::HashMap;
use std::sync::OnceLock;

type KeyFn = fn(&[u8]) -> Result<u64, JournalError>;
type ProfileKeyFn = fn(&[u8]) -> Result<String, JournalError>;
type ValidateFn = fn(&str) -> Result<Vec<u8>, JournalError>;

/// Type-erased operations of one record type.
#[derive(Debug, Clone, Copy)]
pub struct RecordDescriptor {
    /// Stable numeric tag.
    pub tag: i32,
    /// Stable type name.
    pub type_name: &'static str,
    /// Classification flags.
    pub kind: RecordKind,
    instance_key: KeyFn,
    profile_key: Option<ProfileKeyFn>,
    validate: ValidateFn,
}

fn decode_instance_key<R: Record>(payload: &[u8]) -> Result<u64, JournalError> {
    Ok(R::decode(payload)?.instance_key())
}

fn decode_primary_key<R: ProfileRecord>(payload: &[u8]) -> Result<String, JournalError> {
    Ok(R::decode(payload)?.primary_key())
}

fn validate_json<R: Record>(text: &str) -> Result<Vec<u8>, JournalError> {
    let record: R = serde_json::from_str(text).map_err(|e| JournalError::DeserializationError {
        msg_type: R::TAG,
        message: e.to_string(),
    })?;
    record.encode()
}

impl RecordDescriptor {
    /// Descriptor of a plain record type.
    #[must_use]
    pub fn of<R: Record>() -> Self {
        Self {
            tag: R::TAG,
            type_name: R::TYPE_NAME,
            kind: R::KIND,
            instance_key: decode_instance_key::<R>,
            profile_key: None,
            validate: validate_json::<R>,
        }
    }

    /// Descriptor of a record type persisted in the profile store.
    #[must_use]
    pub fn profile<R: ProfileRecord>() -> Self {
        Self {
            profile_key: Some(decode_primary_key::<R>),
            ..Self::of::<R>()
        }
    }

    /// Decodes `payload` and returns its instance key.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] for invalid payloads.
    pub fn instance_key(&self, payload: &[u8]) -> Result<u64, JournalError> {
        (self.instance_key)(payload)
    }

    /// Decodes `payload` and returns its profile primary key, if the type
    /// is a profile type.
    pub fn profile_key(&self, payload: &[u8]) -> Option<Result<String, JournalError>> {
        self.profile_key.map(|f| f(payload))
    }

    /// Parses JSON text as this type and returns the encoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] if the text does not
    /// describe a valid record of this type.
    pub fn encode_json(&self, text: &str) -> Result<Vec<u8>, JournalError> {
        (self.validate)(text)
    }

    /// Whether the type is cached as last-value state.
    #[must_use]
    pub fn is_state(&self) -> bool {
        self.kind.contains(RecordKind::STATE)
    }

    /// Whether the type is kept in the profile store.
    #[must_use]
    pub fn is_profile(&self) -> bool {
        self.profile_key.is_some()
    }
}

/// The record type table.
#[derive(Debug)]
pub struct TypeRegistry {
    descriptors: Vec<RecordDescriptor>,
    by_tag: HashMap<i32, usize>,
}

impl TypeRegistry {
    /// Builds the table of every record type, sorted by tag.
    #[must_use]
    pub fn new() -> Self {
        let mut descriptors = vec![
            RecordDescriptor::of::<Quote>(),
            RecordDescriptor::of::<OrderInput>(),
            RecordDescriptor::of::<Order>(),
            RecordDescriptor::of::<Trade>(),
            RecordDescriptor::of::<Position>(),
            RecordDescriptor::of::<Asset>(),
            RecordDescriptor::profile::<Instrument>(),
            RecordDescriptor::profile::<Commission>(),
            RecordDescriptor::profile::<Location>(),
            RecordDescriptor::of::<Register>(),
            RecordDescriptor::of::<Deregister>(),
            RecordDescriptor::of::<ChannelRequest>(),
            RecordDescriptor::of::<Channel>(),
            RecordDescriptor::of::<RequestCached>(),
            RecordDescriptor::of::<RequestCachedDone>(),
            RecordDescriptor::of::<CacheReset>(),
            RecordDescriptor::of::<TradingDay>(),
        ];
        descriptors.sort_by_key(|d| d.tag);
        let by_tag = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.tag, i))
            .collect();
        Self {
            descriptors,
            by_tag,
        }
    }

    /// The process-wide table.
    pub fn global() -> &'static TypeRegistry {
        static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TypeRegistry::new)
    }

    /// Descriptor for `tag`.
    #[must_use]
    pub fn get(&self, tag: i32) -> Option<&RecordDescriptor> {
        self.by_tag.get(&tag).and_then(|&i| self.descriptors.get(i))
    }

    /// Descriptor for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::UnknownTag`] if the tag is not registered.
    pub fn require(&self, tag: i32) -> Result<&RecordDescriptor, JournalError> {
        self.get(tag).ok_or(JournalError::UnknownTag { msg_type: tag })
    }

    /// Descriptor by type name.
    #[must_use]
    pub fn by_name(&self, type_name: &str) -> Option<&RecordDescriptor> {
        self.descriptors.iter().find(|d| d.type_name == type_name)
    }

    /// Descriptors in tag order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordDescriptor> {
        self.descriptors.iter()
    }

    /// State types in tag order.
    pub fn state_types(&self) -> impl Iterator<Item = &RecordDescriptor> {
        self.descriptors.iter().filter(|d| d.is_state())
    }

    /// Profile types in tag order.
    pub fn profile_types(&self) -> impl Iterator<Item = &RecordDescriptor> {
        self.descriptors.iter().filter(|d| d.is_profile())
    }

    /// Number of record types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MARK_TAG, PAGE_END_TAG, Side};
    use std::collections::HashSet;

    fn assert_registered<R: Record>(registry: &TypeRegistry) {
        let descriptor = registry.get(R::TAG);
        assert!(descriptor.is_some(), "{} missing", R::TYPE_NAME);
        let descriptor = descriptor.unwrap_or_else(|| panic!("descriptor"));
        assert_eq!(descriptor.type_name, R::TYPE_NAME);
        assert_eq!(descriptor.kind, R::KIND);
    }

    #[test]
    fn test_every_record_type_is_registered() {
        let registry = TypeRegistry::new();
        assert_registered::<Quote>(&registry);
        assert_registered::<OrderInput>(&registry);
        assert_registered::<Order>(&registry);
        assert_registered::<Trade>(&registry);
        assert_registered::<Position>(&registry);
        assert_registered::<Asset>(&registry);
        assert_registered::<Instrument>(&registry);
        assert_registered::<Commission>(&registry);
        assert_registered::<Location>(&registry);
        assert_registered::<Register>(&registry);
        assert_registered::<Deregister>(&registry);
        assert_registered::<ChannelRequest>(&registry);
        assert_registered::<Channel>(&registry);
        assert_registered::<RequestCached>(&registry);
        assert_registered::<RequestCachedDone>(&registry);
        assert_registered::<CacheReset>(&registry);
        assert_registered::<TradingDay>(&registry);
        assert_eq!(registry.len(), 17);
    }

    #[test]
    fn test_tags_and_names_are_unique() {
        let registry = TypeRegistry::new();
        let tags: HashSet<i32> = registry.iter().map(|d| d.tag).collect();
        let names: HashSet<&str> = registry.iter().map(|d| d.type_name).collect();
        assert_eq!(tags.len(), registry.len());
        assert_eq!(names.len(), registry.len());
        assert!(!tags.contains(&PAGE_END_TAG));
        assert!(!tags.contains(&MARK_TAG));
    }

    #[test]
    fn test_iteration_is_in_tag_order() {
        let registry = TypeRegistry::global();
        let tags: Vec<i32> = registry.iter().map(|d| d.tag).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_state_and_profile_classification() {
        let registry = TypeRegistry::new();
        let states: Vec<&str> = registry.state_types().map(|d| d.type_name).collect();
        assert_eq!(states, vec!["Order", "Trade", "Position", "Asset"]);
        let profiles: Vec<&str> = registry.profile_types().map(|d| d.type_name).collect();
        assert_eq!(profiles, vec!["Instrument", "Commission", "Location"]);
    }

    #[test]
    fn test_erased_key_functions() {
        let registry = TypeRegistry::new();
        let order = Order {
            order_id: 42,
            instrument_id: "rb2501".to_string(),
            exchange_id: "SHFE".to_string(),
            limit_price: 3500.0,
            volume: 2,
            volume_left: 2,
            side: Side::Buy,
            status: crate::types::OrderStatus::Submitted,
            update_time: 1,
        };
        let payload = order.encode().unwrap_or_default();
        let key = registry.get(Order::TAG).map(|d| d.instance_key(&payload));
        assert!(matches!(key, Some(Ok(42))));

        let desc = registry.get(Instrument::TAG).expect("descriptor");
        let encoded = desc
            .encode_json(
                r#"{"instrument_id":"rb2501","exchange_id":"SHFE","contract_multiplier":10,"price_tick":1.0}"#,
            )
            .expect("encoded");
        let pk = desc.profile_key(&encoded);
        assert!(matches!(pk, Some(Ok(ref k)) if k == "SHFE.rb2501"));
        assert!(desc.encode_json("{}").is_err());
    }
}
