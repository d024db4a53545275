use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Coarse reliability of a value. `Verified` is reserved for manual edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
    Verified,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::Verified => "verified",
        }
    }

    /// Lenient parse of model output; the model can never claim `verified`.
    pub fn from_model(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" | "med" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields tracked on every investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    InvestmentName,
    Firm,
    StrategyDescription,
    Leaders,
    ManagementFees,
    IncentiveFees,
    LiquidityLock,
    TargetNetReturns,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        FieldName::InvestmentName,
        FieldName::Firm,
        FieldName::StrategyDescription,
        FieldName::Leaders,
        FieldName::ManagementFees,
        FieldName::IncentiveFees,
        FieldName::LiquidityLock,
        FieldName::TargetNetReturns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::InvestmentName => "investment_name",
            FieldName::Firm => "firm",
            FieldName::StrategyDescription => "strategy_description",
            FieldName::Leaders => "leaders",
            FieldName::ManagementFees => "management_fees",
            FieldName::IncentiveFees => "incentive_fees",
            FieldName::LiquidityLock => "liquidity_lock",
            FieldName::TargetNetReturns => "target_net_returns",
        }
    }

    /// Human label, also accepted as a key in model output.
    pub fn label(&self) -> &'static str {
        match self {
            FieldName::InvestmentName => "Investment",
            FieldName::Firm => "Firm",
            FieldName::StrategyDescription => "Strategy Description",
            FieldName::Leaders => "Leaders/PM/CEO",
            FieldName::ManagementFees => "Management Fees",
            FieldName::IncentiveFees => "Incentive Fees",
            FieldName::LiquidityLock => "Liquidity/Lock",
            FieldName::TargetNetReturns => "Target Net Returns",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FieldName::ALL
            .into_iter()
            .find(|f| {
                f.as_str().eq_ignore_ascii_case(wanted)
                    || f.label().eq_ignore_ascii_case(wanted)
                    || (*f == FieldName::Leaders && wanted.eq_ignore_ascii_case("leaders_json"))
            })
            .ok_or_else(|| format!("unknown field: {wanted}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    pub name: String,
    /// Only set by enrichment when the match is confident.
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub education: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl Leader {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile_url: None,
            title: None,
            company: None,
            previous_roles: Vec::new(),
            education: Vec::new(),
            background: None,
        }
    }
}

/// A value with the confidence the extraction stage assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extracted<T> {
    pub value: T,
    pub confidence: Confidence,
}

impl<T> Extracted<T> {
    pub fn new(value: T, confidence: Confidence) -> Self {
        Self { value, confidence }
    }
}

/// Field name -> value + confidence. `None` means "not found in the source".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub investment_name: Option<Extracted<String>>,
    pub firm: Option<Extracted<String>>,
    pub strategy_description: Option<Extracted<String>>,
    pub leaders: Option<Extracted<Vec<Leader>>>,
    pub management_fees: Option<Extracted<String>>,
    pub incentive_fees: Option<Extracted<String>>,
    pub liquidity_lock: Option<Extracted<String>>,
    pub target_net_returns: Option<Extracted<String>>,
}

impl ExtractedFields {
    /// Scalar field accessor; `Leaders` has no scalar form and yields `None`.
    pub fn text(&self, field: FieldName) -> Option<&Extracted<String>> {
        match field {
            FieldName::InvestmentName => self.investment_name.as_ref(),
            FieldName::Firm => self.firm.as_ref(),
            FieldName::StrategyDescription => self.strategy_description.as_ref(),
            FieldName::Leaders => None,
            FieldName::ManagementFees => self.management_fees.as_ref(),
            FieldName::IncentiveFees => self.incentive_fees.as_ref(),
            FieldName::LiquidityLock => self.liquidity_lock.as_ref(),
            FieldName::TargetNetReturns => self.target_net_returns.as_ref(),
        }
    }

    pub fn set_text(&mut self, field: FieldName, value: Option<Extracted<String>>) {
        let slot = match field {
            FieldName::InvestmentName => &mut self.investment_name,
            FieldName::Firm => &mut self.firm,
            FieldName::StrategyDescription => &mut self.strategy_description,
            FieldName::Leaders => return,
            FieldName::ManagementFees => &mut self.management_fees,
            FieldName::IncentiveFees => &mut self.incentive_fees,
            FieldName::LiquidityLock => &mut self.liquidity_lock,
            FieldName::TargetNetReturns => &mut self.target_net_returns,
        };
        *slot = value;
    }

    pub fn firm_name(&self) -> Option<&str> {
        self.firm.as_ref().map(|f| f.value.as_str())
    }

    pub fn investment_name(&self) -> Option<&str> {
        self.investment_name.as_ref().map(|f| f.value.as_str())
    }

    pub fn found_count(&self) -> usize {
        FieldName::ALL
            .iter()
            .filter(|f| match f {
                FieldName::Leaders => self.leaders.is_some(),
                other => self.text(**other).is_some(),
            })
            .count()
    }
}

/// One extraction run for one document. Never modified after it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: Uuid,
    pub document_id: Uuid,
    pub fields: ExtractedFields,
    pub model: String,
    pub attempts: u32,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(document_id: Uuid, fields: ExtractedFields, model: String, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            fields,
            model,
            attempts,
            extracted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert!(Confidence::High < Confidence::Verified);
        assert_eq!(Confidence::from_model(" HIGH "), Some(Confidence::High));
        assert_eq!(Confidence::from_model("verified"), None);
    }

    #[test]
    fn test_field_name_parsing() {
        assert_eq!("firm".parse::<FieldName>().unwrap(), FieldName::Firm);
        assert_eq!("Leaders/PM/CEO".parse::<FieldName>().unwrap(), FieldName::Leaders);
        assert_eq!("leaders_json".parse::<FieldName>().unwrap(), FieldName::Leaders);
        assert!("aum".parse::<FieldName>().is_err());
    }

    #[test]
    fn test_found_count_counts_leaders() {
        let mut fields = ExtractedFields::default();
        fields.set_text(FieldName::Firm, Some(Extracted::new("Acme".into(), Confidence::High)));
        fields.leaders = Some(Extracted::new(vec![Leader::named("Jane Doe")], Confidence::Medium));
        assert_eq!(fields.found_count(), 2);
        assert_eq!(fields.firm_name(), Some("Acme"));
    }
}
