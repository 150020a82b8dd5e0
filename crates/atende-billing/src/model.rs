use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

const SETTLED_STATUS_MARKERS: &[&str] = &["paid", "settled", "liquidated", "cancelled"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "nome", alias = "razao")]
    pub name: String,
    #[serde(default, alias = "cnpj_cpf", alias = "documento")]
    pub document: Option<String>,
}

impl Customer {
    /// First name, used to greet the customer.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "ativo", alias = "status", deserialize_with = "de_flag")]
    pub active: bool,
    #[serde(default, alias = "descricao", alias = "contrato")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, alias = "data_vencimento", alias = "vencimento")]
    pub due_date: Option<String>,
    #[serde(default, alias = "data_pagamento")]
    pub payment_date: Option<String>,
    #[serde(default, alias = "status")]
    pub status_text: String,
    #[serde(default, alias = "valor", deserialize_with = "de_amount")]
    pub amount: Option<f64>,
}

impl Bill {
    /// A bill can be offered for payment when it has an id, no payment date,
    /// and a status free of the settled markers (case-insensitive substring).
    pub fn is_eligible(&self) -> bool {
        let has_id = self.id.as_deref().is_some_and(|id| !id.trim().is_empty());
        if !has_id || self.is_paid() {
            return false;
        }
        let status = self.status_text.to_lowercase();
        !SETTLED_STATUS_MARKERS
            .iter()
            .any(|marker| status.contains(marker))
    }

    fn is_paid(&self) -> bool {
        match self.payment_date.as_deref().map(str::trim) {
            None | Some("") | Some("0000-00-00") | Some("00/00/0000") => false,
            Some(_) => true,
        }
    }

    /// Due date in either ISO (`2024-05-10`, optionally with a time part) or
    /// Brazilian (`10/05/2024`) form.
    pub fn due_date(&self) -> Option<NaiveDate> {
        parse_date(self.due_date.as_deref()?)
    }

    pub fn formatted_amount(&self) -> Option<String> {
        self.amount
            .map(|value| format!("R$ {:.2}", value).replace('.', ","))
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.split(|c: char| c == 'T' || c == ' ').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Number(i64),
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match LooseId::deserialize(deserializer)? {
        LooseId::Text(text) => Ok(text),
        LooseId::Number(n) => Ok(n.to_string()),
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<LooseId> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|id| match id {
        LooseId::Text(text) if text.trim().is_empty() => None,
        LooseId::Text(text) => Some(text),
        LooseId::Number(n) => Some(n.to_string()),
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseFlag {
    Bool(bool),
    Number(i64),
    Text(String),
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<LooseFlag> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(LooseFlag::Bool(b)) => b,
        Some(LooseFlag::Number(n)) => n != 0,
        Some(LooseFlag::Text(text)) => matches!(
            text.trim().to_lowercase().as_str(),
            "a" | "s" | "1" | "true" | "sim" | "ativo" | "active"
        ),
        None => false,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseAmount {
    Number(f64),
    Text(String),
}

fn de_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<LooseAmount> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(LooseAmount::Number(n)) => Some(n),
        Some(LooseAmount::Text(text)) => {
            let text = text.trim();
            // "1.234,56" -> "1234.56"; "89.90" stays as is
            let normalized = if text.contains(',') {
                text.replace('.', "").replace(',', ".")
            } else {
                text.to_string()
            };
            normalized.parse().ok()
        }
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::{Bill, Customer, Service};
    use chrono::NaiveDate;
    use serde_json::json;

    fn bill(id: Option<&str>, payment_date: Option<&str>, status: &str) -> Bill {
        Bill {
            id: id.map(str::to_string),
            due_date: Some("2024-05-10".to_string()),
            payment_date: payment_date.map(str::to_string),
            status_text: status.to_string(),
            amount: Some(99.9),
        }
    }

    #[test]
    fn open_bill_is_eligible() {
        assert!(bill(Some("10"), None, "Aberto").is_eligible());
        assert!(bill(Some("10"), Some(""), "open").is_eligible());
        assert!(bill(Some("10"), Some("0000-00-00"), "A receber").is_eligible());
    }

    #[test]
    fn bill_without_id_is_not_eligible() {
        assert!(!bill(None, None, "open").is_eligible());
        assert!(!bill(Some("  "), None, "open").is_eligible());
    }

    #[test]
    fn paid_or_cancelled_bill_is_not_eligible() {
        assert!(!bill(Some("1"), Some("2024-05-09"), "open").is_eligible());
        assert!(!bill(Some("1"), None, "PAID").is_eligible());
        assert!(!bill(Some("1"), None, "Settled by bank").is_eligible());
        assert!(!bill(Some("1"), None, "liquidated").is_eligible());
        assert!(!bill(Some("1"), None, "Cancelled").is_eligible());
    }

    #[test]
    fn portuguese_unpaid_status_stays_eligible() {
        assert!(bill(Some("1"), None, "Não pago").is_eligible());
        assert!(bill(Some("1"), None, "Em aberto - a pagar").is_eligible());
    }

    #[test]
    fn due_date_parses_iso_and_brazilian_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 10);
        let mut b = bill(Some("1"), None, "open");
        assert_eq!(b.due_date(), expected);
        b.due_date = Some("10/05/2024".to_string());
        assert_eq!(b.due_date(), expected);
        b.due_date = Some("2024-05-10 00:00:00".to_string());
        assert_eq!(b.due_date(), expected);
        b.due_date = Some("soon".to_string());
        assert_eq!(b.due_date(), None);
    }

    #[test]
    fn deserializes_portuguese_field_names_and_loose_values() {
        let b: Bill = serde_json::from_value(json!({
            "id": 42,
            "data_vencimento": "10/05/2024",
            "data_pagamento": null,
            "status": "A",
            "valor": "1.234,56"
        }))
        .expect("bill");
        assert_eq!(b.id.as_deref(), Some("42"));
        assert_eq!(b.amount, Some(1234.56));
        assert_eq!(b.formatted_amount().as_deref(), Some("R$ 1234,56"));

        let s: Service = serde_json::from_value(json!({"id": "7", "status": "A"})).expect("svc");
        assert!(s.active);

        let c: Customer =
            serde_json::from_value(json!({"id": 3, "razao": "Maria da Silva"})).expect("customer");
        assert_eq!(c.id, "3");
        assert_eq!(c.first_name(), "Maria");
    }
}
