use serde_json::{Value, json};

/// A single property value in Wikibase terms, typed by target datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum SnakValue {
    /// Another knowledge-base item, by Q-identifier.
    Item(String),
    Str(String),
    ExternalId(String),
    Url(String),
    /// Wikibase time literal, e.g. `+2020-06-01T00:00:00Z`.
    Time(String),
}

impl SnakValue {
    fn datatype(&self) -> &'static str {
        match self {
            SnakValue::Item(_) => "wikibase-item",
            SnakValue::Str(_) => "string",
            SnakValue::ExternalId(_) => "external-id",
            SnakValue::Url(_) => "url",
            SnakValue::Time(_) => "time",
        }
    }

    fn datavalue(&self) -> Value {
        match self {
            SnakValue::Item(id) => json!({
                "value": { "entity-type": "item", "id": id },
                "type": "wikibase-entityid",
            }),
            SnakValue::Str(value) | SnakValue::ExternalId(value) | SnakValue::Url(value) => {
                json!({ "value": value, "type": "string" })
            }
            SnakValue::Time(value) => json!({
                "value": {
                    "time": value,
                    "timezone": 0,
                    "before": 0,
                    "after": 0,
                    "precision": 11,
                    "calendarmodel": "http://www.wikidata.org/entity/Q1985727",
                },
                "type": "time",
            }),
        }
    }
}

/// One property/value pair; the unit references and qualifiers are
/// built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Snak {
    pub property: String,
    pub value: SnakValue,
}

impl Snak {
    pub fn new(property: impl Into<String>, value: SnakValue) -> Self {
        Self {
            property: property.into(),
            value,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "snaktype": "value",
            "property": self.property,
            "datatype": self.value.datatype(),
            "datavalue": self.value.datavalue(),
        })
    }
}

/// A reference bundle: a group of snaks attributing provenance to one
/// source (e.g. "stated in the registry" + the part's reference URL).
pub type Reference = Vec<Snak>;

/// A typed fact ready to be attached to a knowledge-base item.
/// References assert provenance; qualifiers attach context to the fact
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub snak: Snak,
    pub references: Vec<Reference>,
    pub qualifiers: Vec<Snak>,
}

impl Statement {
    pub fn new(snak: Snak) -> Self {
        Self {
            snak,
            references: Vec::new(),
            qualifiers: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    pub fn with_qualifiers(mut self, qualifiers: Vec<Snak>) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    /// Renders the statement as one `wbeditentity` claim object.
    pub fn to_claim_json(&self) -> Value {
        let mut claim = json!({
            "mainsnak": self.snak.to_json(),
            "type": "statement",
            "rank": "normal",
        });

        if !self.qualifiers.is_empty() {
            let (snaks, order) = group_snaks(&self.qualifiers);
            claim["qualifiers"] = snaks;
            claim["qualifiers-order"] = json!(order);
        }

        if !self.references.is_empty() {
            let references: Vec<Value> = self
                .references
                .iter()
                .map(|reference| {
                    let (snaks, order) = group_snaks(reference);
                    json!({ "snaks": snaks, "snaks-order": order })
                })
                .collect();
            claim["references"] = json!(references);
        }

        claim
    }
}

fn group_snaks(snaks: &[Snak]) -> (Value, Vec<String>) {
    let mut grouped = serde_json::Map::new();
    let mut order = Vec::new();
    for snak in snaks {
        if !order.contains(&snak.property) {
            order.push(snak.property.clone());
        }
        grouped
            .entry(snak.property.clone())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("grouped snaks are arrays")
            .push(snak.to_json());
    }
    (Value::Object(grouped), order)
}

/// Day-precision retrieved-date qualifier in Wikibase time format.
pub fn retrieved_qualifier(property: &str) -> Snak {
    let today = chrono::Utc::now().format("+%Y-%m-%dT00:00:00Z").to_string();
    Snak::new(property, SnakValue::Time(today))
}
