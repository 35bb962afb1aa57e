use crate::value::Value;

/// Ordered field-name map describing an object's visible state.
///
/// Field order is preserved so packed documents list fields in the order the
/// object reported them.
#[derive(Clone, Debug, Default)]
pub struct Fields {
    entries: Vec<(String, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` over this map.
    pub fn merge(&mut self, other: Fields) {
        for (name, value) in other {
            self.insert(name, value);
        }
    }
}

impl PartialEq for Fields {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(n, v)| other.get(n) == Some(v))
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_order() {
        let fields = Fields::new().with("b", 1).with("a", 2).with("c", 3);
        let names: Vec<&str> = fields.names().collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn merge_overwrites() {
        let mut fields = Fields::new().with("a", 1).with("b", 2);
        fields.merge(Fields::new().with("b", 20).with("c", 30));
        assert_eq!(fields.get("b"), Some(&Value::Int(20)));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn remove_field() {
        let mut fields = Fields::new().with("a", 1);
        assert_eq!(fields.remove("a"), Some(Value::Int(1)));
        assert!(fields.remove("a").is_none());
    }
}
