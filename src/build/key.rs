//! Part identifiers, parameter values and the canonical cache key.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use sha2::{Digest, Sha256};

use super::error::{BuildError, BuildResult};

/// Design families understood by the model file.
///
/// The discriminants are part of the wire contract with the model file
/// (`-D part=<tag>`) and must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Part {
    Tile = 0,
    Hook = 1,
    Bolt = 2,
    Bin = 3,
    Cup = 4,
    Rack = 5,
    Shelf = 6,
    HoleShelf = 7,
    SlotShelf = 8,
    GridfinityShelf = 9,
    GridTile = 10,
    HangerMount = 11,
    CableClip = 12,
}

impl Part {
    pub const ALL: [Part; 13] = [
        Part::Tile,
        Part::Hook,
        Part::Bolt,
        Part::Bin,
        Part::Cup,
        Part::Rack,
        Part::Shelf,
        Part::HoleShelf,
        Part::SlotShelf,
        Part::GridfinityShelf,
        Part::GridTile,
        Part::HangerMount,
        Part::CableClip,
    ];

    /// Stable numeric tag passed to the generator.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.tag() == tag)
    }

    /// URL/CLI slug, e.g. `hole-shelf`.
    pub fn slug(self) -> &'static str {
        match self {
            Part::Tile => "tile",
            Part::Hook => "hook",
            Part::Bolt => "bolt",
            Part::Bin => "bin",
            Part::Cup => "cup",
            Part::Rack => "rack",
            Part::Shelf => "shelf",
            Part::HoleShelf => "hole-shelf",
            Part::SlotShelf => "slot-shelf",
            Part::GridfinityShelf => "gridfinity-shelf",
            Part::GridTile => "grid-tile",
            Part::HangerMount => "hanger-mount",
            Part::CableClip => "cable-clip",
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Part {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.slug() == normalized)
            .ok_or_else(|| BuildError::InvalidInvocation(format!("unknown part '{}'", s)))
    }
}

/// Hanger style shared by most parts, passed on as its integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    #[default]
    Original = 0,
    ThickerCleats = 1,
}

impl From<Variant> for ParamValue {
    fn from(v: Variant) -> Self {
        ParamValue::Number(v as u8 as f64)
    }
}

/// A single named parameter value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    /// Left unset; the generator applies its own default.
    Absent,
}

impl ParamValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ParamValue::Absent)
    }

    /// Renders the value the way the generator's `-D` defines expect it.
    ///
    /// Returns `None` for `Absent`, which is never passed on.
    pub fn render(&self) -> Option<String> {
        match self {
            ParamValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            ParamValue::Number(n) => Some(format!("{}", n)),
            ParamValue::Text(s) => {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                Some(format!("\"{}\"", escaped))
            }
            ParamValue::Absent => None,
        }
    }
}

// Floats compare by bit pattern: exact, and consistent with `Hash`.
impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Number(a), ParamValue::Number(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            (ParamValue::Absent, ParamValue::Absent) => true,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamValue::Bool(b) => b.hash(state),
            ParamValue::Number(n) => n.to_bits().hash(state),
            ParamValue::Text(s) => s.hash(state),
            ParamValue::Absent => {}
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n as f64)
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::Number(n as f64)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Absent)
    }
}

/// Flat name → value mapping handed over by the API layer.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Canonical identity of one build: the part plus every present parameter.
///
/// Absent values are dropped on construction, so "explicitly unset" and
/// "never mentioned" produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamKey {
    part: Part,
    params: BTreeMap<String, ParamValue>,
}

impl ParamKey {
    /// Builds a key from an already-validated parameter mapping.
    ///
    /// Fails with `InvalidInvocation` when no parameter is present, when a
    /// name cannot be used as a generator define, or when a number is not
    /// finite.
    pub fn new<I, K, V>(part: Part, params: I) -> BuildResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let mut present = BTreeMap::new();
        for (name, value) in params {
            let name = name.into();
            let value = value.into();
            if value.is_absent() {
                continue;
            }
            validate_name(&name)?;
            if let ParamValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(BuildError::InvalidInvocation(format!(
                        "parameter '{}' is not a finite number",
                        name
                    )));
                }
            }
            present.insert(name, value);
        }

        if present.is_empty() {
            return Err(BuildError::InvalidInvocation("no parameters given".to_string()));
        }

        Ok(Self { part, params: present })
    }

    pub fn part(&self) -> Part {
        self.part
    }

    /// Present parameters in lexicographic name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Rendered `name=value` defines, part tag first.
    pub fn defines(&self) -> Vec<String> {
        let mut defines = Vec::with_capacity(self.params.len() + 1);
        defines.push(format!("part={}", self.part.tag()));
        for (name, value) in &self.params {
            if let Some(rendered) = value.render() {
                defines.push(format!("{}={}", name, rendered));
            }
        }
        defines
    }

    /// Hex SHA-256 of the rendered defines. Used for log correlation and ETags.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for define in self.defines() {
            hasher.update(define.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.part, self.params.len())
    }
}

fn validate_name(name: &str) -> BuildResult<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BuildError::InvalidInvocation(format!(
            "invalid parameter name '{}'",
            name
        )));
    }
    if name == "part" {
        return Err(BuildError::InvalidInvocation(
            "'part' is reserved for the part identifier".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &ParamKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_insertion_order_is_irrelevant() {
        let a = ParamKey::new(Part::Bin, vec![("bin_width", 41.5), ("bin_depth", 30.0)]).unwrap();
        let b = ParamKey::new(Part::Bin, vec![("bin_depth", 30.0), ("bin_width", 41.5)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_absent_equals_unmentioned() {
        let a = ParamKey::new(
            Part::Shelf,
            vec![("shelf_width", ParamValue::from(83.5)), ("shelf_depth", ParamValue::Absent)],
        )
        .unwrap();
        let b = ParamKey::new(Part::Shelf, vec![("shelf_width", 83.5)]).unwrap();
        assert_eq!(a, b);
        assert!(a.get("shelf_depth").is_none());
    }

    #[test]
    fn test_part_is_part_of_identity() {
        let a = ParamKey::new(Part::Shelf, vec![("width", 10.0)]).unwrap();
        let b = ParamKey::new(Part::Rack, vec![("width", 10.0)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_float_equality_is_exact() {
        let a = ParamKey::new(Part::Cup, vec![("cup_diameter", 0.1 + 0.2)]).unwrap();
        let b = ParamKey::new(Part::Cup, vec![("cup_diameter", 0.3)]).unwrap();
        assert_ne!(a, b);

        let zero = ParamKey::new(Part::Cup, vec![("cup_base", 0.0)]).unwrap();
        let neg_zero = ParamKey::new(Part::Cup, vec![("cup_base", -0.0)]).unwrap();
        assert_ne!(zero, neg_zero);
    }

    #[test]
    fn test_zero_and_false_are_present() {
        let key = ParamKey::new(
            Part::Tile,
            vec![
                ("tile_fill_top", ParamValue::Bool(false)),
                ("tile_countersink", ParamValue::Number(0.0)),
                ("tile_skip_list", ParamValue::Text(String::new())),
            ],
        )
        .unwrap();
        assert_eq!(key.len(), 3);
    }

    #[test]
    fn test_empty_params_rejected() {
        let err = ParamKey::new(Part::Bolt, Vec::<(String, ParamValue)>::new()).unwrap_err();
        assert!(matches!(err, BuildError::InvalidInvocation(_)));

        let only_absent = ParamKey::new(Part::Bolt, vec![("bolt_length", ParamValue::Absent)]);
        assert!(only_absent.is_err());
    }

    #[test]
    fn test_bad_names_and_numbers_rejected() {
        assert!(ParamKey::new(Part::Hook, vec![("1abc", 1.0)]).is_err());
        assert!(ParamKey::new(Part::Hook, vec![("a=b", 1.0)]).is_err());
        assert!(ParamKey::new(Part::Hook, vec![("part", 1.0)]).is_err());
        assert!(ParamKey::new(Part::Hook, vec![("hook_width", f64::NAN)]).is_err());
        assert!(ParamKey::new(Part::Hook, vec![("hook_width", f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_render_values() {
        assert_eq!(ParamValue::from(20.0).render().unwrap(), "20");
        assert_eq!(ParamValue::from(41.5).render().unwrap(), "41.5");
        assert_eq!(ParamValue::from(0.15).render().unwrap(), "0.15");
        assert_eq!(ParamValue::from(4i64).render().unwrap(), "4");
        assert_eq!(ParamValue::from(true).render().unwrap(), "true");
        assert_eq!(ParamValue::from(false).render().unwrap(), "false");
        assert_eq!(ParamValue::from("[1, 2]").render().unwrap(), "\"[1, 2]\"");
        assert_eq!(ParamValue::from("a\"b\\c").render().unwrap(), "\"a\\\"b\\\\c\"");
        assert!(ParamValue::Absent.render().is_none());
    }

    #[test]
    fn test_defines_are_sorted_with_part_first() {
        let key = ParamKey::new(
            Part::Bin,
            vec![("variant", ParamValue::from(Variant::Original)), ("bin_width", 41.5.into())],
        )
        .unwrap();
        assert_eq!(key.defines(), vec!["part=3", "bin_width=41.5", "variant=0"]);
    }

    #[test]
    fn test_variant_renders_as_integer() {
        assert_eq!(ParamValue::from(Variant::ThickerCleats).render().unwrap(), "1");
        assert_eq!(ParamValue::from(Variant::default()).render().unwrap(), "0");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ParamKey::new(Part::Bin, vec![("bin_width", 41.5), ("bin_depth", 30.0)]).unwrap();
        let b = ParamKey::new(Part::Bin, vec![("bin_depth", 30.0), ("bin_width", 41.5)]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_part_slugs_round_trip() {
        for part in Part::ALL {
            assert_eq!(part.slug().parse::<Part>().unwrap(), part);
            assert_eq!(Part::from_tag(part.tag()), Some(part));
        }
        assert_eq!("gridfinity_shelf".parse::<Part>().unwrap(), Part::GridfinityShelf);
        assert!("widget".parse::<Part>().is_err());
    }
}
