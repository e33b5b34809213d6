//! Payload tree: the semantically typed body of a message
//!
//! Elements form a closed set of variants tagged on the wire by `modelType`.
//! The tag is derived from the variant when encoding and selects the variant
//! decoder when decoding (see [`crate::codec`]).

use serde::{Deserialize, Deserializer, Serialize};

/// Wire tag of [`Property`]
pub const MODEL_TYPE_PROPERTY: &str = "Property";
/// Wire tag of [`ElementCollection`]
pub const MODEL_TYPE_COLLECTION: &str = "Collection";
/// Wire tag of [`ElementList`]
pub const MODEL_TYPE_LIST: &str = "List";
/// Long AAS form accepted when decoding collections
pub const MODEL_TYPE_COLLECTION_AAS: &str = "SubmodelElementCollection";
/// Long AAS form accepted when decoding lists
pub const MODEL_TYPE_LIST_AAS: &str = "SubmodelElementList";

/// Value type used when a property does not name one
pub const DEFAULT_VALUE_TYPE: &str = "xs:string";

fn default_value_type() -> String {
    DEFAULT_VALUE_TYPE.to_string()
}

/// One typed key of a semantic reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: String,
}

impl Key {
    pub fn new(key_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key_type: key_type.into(),
            value: value.into(),
        }
    }
}

/// Reference kind tag. Unrecognised tags are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReferenceKind {
    #[default]
    ExternalReference,
    ModelReference,
    Other(String),
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::ExternalReference => "ExternalReference",
            ReferenceKind::ModelReference => "ModelReference",
            ReferenceKind::Other(tag) => tag,
        }
    }
}

impl From<String> for ReferenceKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ExternalReference" => ReferenceKind::ExternalReference,
            "ModelReference" => ReferenceKind::ModelReference,
            _ => ReferenceKind::Other(tag),
        }
    }
}

impl From<ReferenceKind> for String {
    fn from(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// Semantic reference attached to an element. Carries domain meaning only,
/// never used for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(rename = "type", default)]
    pub kind: ReferenceKind,
}

impl Reference {
    /// External reference with a single `GlobalReference` key
    pub fn global(value: impl Into<String>) -> Self {
        Self {
            keys: vec![Key::new("GlobalReference", value)],
            kind: ReferenceKind::ExternalReference,
        }
    }

    pub fn new(kind: ReferenceKind, keys: Vec<Key>) -> Self {
        Self { keys, kind }
    }
}

/// Multi-language text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangString {
    pub language: String,
    pub text: String,
}

impl LangString {
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
        }
    }
}

/// Leaf scalar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id_short: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<LangString>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default = "default_value_type")]
    pub value_type: String,
}

impl Property {
    /// String property with the given value
    pub fn new(id_short: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id_short: id_short.into(),
            semantic_id: None,
            description: None,
            value: Some(value.into()),
            value_type: default_value_type(),
        }
    }

    /// Property without a value
    pub fn empty(id_short: impl Into<String>) -> Self {
        Self {
            id_short: id_short.into(),
            semantic_id: None,
            description: None,
            value: None,
            value_type: default_value_type(),
        }
    }

    pub fn with_value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = value_type.into();
        self
    }

    pub fn with_semantic_id(mut self, semantic_id: Reference) -> Self {
        self.semantic_id = Some(semantic_id);
        self
    }

    pub fn with_description(mut self, description: LangString) -> Self {
        self.description.get_or_insert_with(Vec::new).push(description);
        self
    }
}

/// Named group of elements, insertion ordered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementCollection {
    pub id_short: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<LangString>>,
    pub value: Vec<PayloadElement>,
}

impl ElementCollection {
    pub fn new(id_short: impl Into<String>) -> Self {
        Self {
            id_short: id_short.into(),
            semantic_id: None,
            description: None,
            value: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: impl Into<PayloadElement>) -> Self {
        self.value.push(element.into());
        self
    }

    pub fn with_semantic_id(mut self, semantic_id: Reference) -> Self {
        self.semantic_id = Some(semantic_id);
        self
    }

    pub fn with_description(mut self, description: LangString) -> Self {
        self.description.get_or_insert_with(Vec::new).push(description);
        self
    }
}

/// Homogeneous ordered sequence of elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementList {
    pub id_short: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<LangString>>,
    #[serde(
        rename = "typeValueListElement",
        skip_serializing_if = "Option::is_none"
    )]
    pub element_type_hint: Option<String>,
    pub value: Vec<PayloadElement>,
}

impl ElementList {
    pub fn new(id_short: impl Into<String>) -> Self {
        Self {
            id_short: id_short.into(),
            semantic_id: None,
            description: None,
            element_type_hint: None,
            value: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: impl Into<PayloadElement>) -> Self {
        self.value.push(element.into());
        self
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.element_type_hint = Some(hint.into());
        self
    }

    pub fn with_semantic_id(mut self, semantic_id: Reference) -> Self {
        self.semantic_id = Some(semantic_id);
        self
    }
}

/// A node of the payload tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "modelType")]
pub enum PayloadElement {
    Property(Property),
    Collection(ElementCollection),
    List(ElementList),
}

impl PayloadElement {
    /// Discriminator written to the wire
    pub fn model_type(&self) -> &'static str {
        match self {
            PayloadElement::Property(_) => MODEL_TYPE_PROPERTY,
            PayloadElement::Collection(_) => MODEL_TYPE_COLLECTION,
            PayloadElement::List(_) => MODEL_TYPE_LIST,
        }
    }

    pub fn id_short(&self) -> &str {
        match self {
            PayloadElement::Property(p) => &p.id_short,
            PayloadElement::Collection(c) => &c.id_short,
            PayloadElement::List(l) => &l.id_short,
        }
    }

    pub fn semantic_id(&self) -> Option<&Reference> {
        match self {
            PayloadElement::Property(p) => p.semantic_id.as_ref(),
            PayloadElement::Collection(c) => c.semantic_id.as_ref(),
            PayloadElement::List(l) => l.semantic_id.as_ref(),
        }
    }

    /// Child elements; empty for properties
    pub fn children(&self) -> &[PayloadElement] {
        match self {
            PayloadElement::Property(_) => &[],
            PayloadElement::Collection(c) => &c.value,
            PayloadElement::List(l) => &l.value,
        }
    }

    pub fn as_property(&self) -> Option<&Property> {
        match self {
            PayloadElement::Property(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&ElementCollection> {
        match self {
            PayloadElement::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ElementList> {
        match self {
            PayloadElement::List(l) => Some(l),
            _ => None,
        }
    }

    /// First direct child with the given `idShort`
    pub fn find(&self, id_short: &str) -> Option<&PayloadElement> {
        find_element(self.children(), id_short)
    }

    /// Value of a direct child property
    pub fn property_value(&self, id_short: &str) -> Option<&str> {
        self.find(id_short)
            .and_then(PayloadElement::as_property)
            .and_then(|p| p.value.as_deref())
    }
}

/// First element in `elements` with the given `idShort`
pub fn find_element<'a>(elements: &'a [PayloadElement], id_short: &str) -> Option<&'a PayloadElement> {
    elements.iter().find(|e| e.id_short() == id_short)
}

impl From<Property> for PayloadElement {
    fn from(p: Property) -> Self {
        PayloadElement::Property(p)
    }
}

impl From<ElementCollection> for PayloadElement {
    fn from(c: ElementCollection) -> Self {
        PayloadElement::Collection(c)
    }
}

impl From<ElementList> for PayloadElement {
    fn from(l: ElementList) -> Self {
        PayloadElement::List(l)
    }
}

impl<'de> Deserialize<'de> for PayloadElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        crate::codec::decode_element(&value, "$").map_err(serde::de::Error::custom)
    }
}
