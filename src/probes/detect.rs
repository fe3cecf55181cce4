//! Typed views of the page-script results and the verdicts drawn from them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormScan {
    pub forms: u32,
    pub email_inputs: u32,
    pub text_inputs: u32,
    pub textareas: u32,
    pub submit_buttons: u32,
    pub contact_blocks: u32,
}

impl FormScan {
    /// A page can capture a lead if it has a form or any email/name field.
    pub fn is_valid(&self) -> bool {
        self.forms > 0 || self.email_inputs > 0 || self.text_inputs > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FillReport {
    pub filled: Vec<String>,
    pub submit_blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtaScan {
    pub buttons: u32,
    pub cta_links: u32,
    pub text_ctas: u32,
    /// Elements sampled for the clickability check.
    pub sampled: u32,
    pub clickable: u32,
}

impl CtaScan {
    pub fn is_valid(&self) -> bool {
        self.buttons > 0 || self.cta_links > 0 || self.text_ctas > 0
    }

    pub fn total(&self) -> u32 {
        self.buttons + self.cta_links + self.text_ctas
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageScan {
    pub total: u32,
    pub broken: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportMeta {
    pub present: bool,
    pub content: Option<String>,
}

/// Decode a script result, falling back to the empty value on shape mismatch.
pub fn decode<T: serde::de::DeserializeOwned + Default>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_form_classification() {
        let scan: FormScan = decode(json!({
            "forms": 0, "emailInputs": 1, "textInputs": 0,
            "textareas": 0, "submitButtons": 0, "contactBlocks": 0
        }));
        assert!(scan.is_valid());

        let empty: FormScan = decode(json!({"forms": 0, "textareas": 3}));
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_cta_classification() {
        assert!(!CtaScan::default().is_valid());
        let scan: CtaScan = decode(json!({"textCtas": 2}));
        assert!(scan.is_valid());
        assert_eq!(scan.total(), 2);
    }

    #[test]
    fn test_decode_tolerates_garbage() {
        let scan: ImageScan = decode(json!("not an object"));
        assert_eq!(scan, ImageScan::default());
    }
}
