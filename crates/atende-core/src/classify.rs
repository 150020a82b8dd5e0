//! Maps upstream failures to what the customer is told and what gets logged.

use atende_billing::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Offline,
    Timeout,
    ServerFault,
    Generic,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Offline => "offline",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ServerFault => "server_fault",
            ErrorCategory::Generic => "generic",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Offline => {
                "⚠️ Nosso sistema de cobrança está fora do ar no momento. Tente novamente em alguns minutos ou digite *8* para voltar ao menu."
            }
            ErrorCategory::Timeout => {
                "⏳ O sistema de cobrança está demorando para responder. Tente novamente em instantes ou digite *8* para voltar ao menu."
            }
            ErrorCategory::ServerFault => {
                "⚠️ O sistema de cobrança está com instabilidade. Tente novamente mais tarde ou digite *8* para voltar ao menu."
            }
            ErrorCategory::Generic => {
                "❌ Não foi possível concluir sua solicitação agora. Digite *8* para voltar ao menu."
            }
        }
    }

    pub fn log_line(&self) -> &'static str {
        match self {
            ErrorCategory::Offline => "billing backend unreachable (connection refused or DNS failure)",
            ErrorCategory::Timeout => "billing backend did not answer within the timeout",
            ErrorCategory::ServerFault => "billing backend returned a server error",
            ErrorCategory::Generic => "unexpected failure while handling message",
        }
    }
}

pub fn classify(err: &BillingError) -> ErrorCategory {
    match err {
        BillingError::Network(_) => ErrorCategory::Offline,
        BillingError::Timeout(_) => ErrorCategory::Timeout,
        BillingError::Http { status, .. } if *status >= 500 => ErrorCategory::ServerFault,
        _ => ErrorCategory::Generic,
    }
}

/// Like [`classify`] for arbitrary errors: a wrapped [`BillingError`] is
/// classified structurally, anything else by its message.
pub fn classify_any(err: &anyhow::Error) -> ErrorCategory {
    if let Some(billing) = err.downcast_ref::<BillingError>() {
        return classify(billing);
    }
    classify_message(&format!("{:#}", err))
}

fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    const OFFLINE: &[&str] = &[
        "connection refused",
        "econnrefused",
        "enotfound",
        "dns",
        "network",
        "unreachable",
    ];
    if OFFLINE.iter().any(|p| lower.contains(p)) {
        return ErrorCategory::Offline;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("abort") {
        return ErrorCategory::Timeout;
    }
    if http_status(&lower).is_some_and(|status| status >= 500) {
        return ErrorCategory::ServerFault;
    }
    ErrorCategory::Generic
}

fn http_status(lower: &str) -> Option<u16> {
    let (_, rest) = lower.split_once("http ")?;
    rest.get(..3)?.parse().ok()
}
