//! Provider credentials, environment-only
//!
//! All values here are sensitive and therefore read exclusively from the
//! environment. A provider whose credentials are absent is simply not
//! constructed; nothing in this module invents defaults.

use crate::ConfigError;
use std::env;

fn opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    opt(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

/// APNs credentials (ES256 token auth).
#[derive(Debug, Clone)]
pub struct ApnsSecrets {
    pub key_id: String,
    pub team_id: String,
    pub bundle_id: String,
    /// PKCS8 PEM private key.
    pub private_key: String,
    /// "production" or "sandbox".
    pub environment: String,
}

impl ApnsSecrets {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            key_id: opt("APNS_KEY_ID")?,
            team_id: opt("APNS_TEAM_ID")?,
            bundle_id: opt("APNS_BUNDLE_ID")?,
            private_key: opt("APNS_PRIVATE_KEY")?,
            environment: opt("APNS_ENVIRONMENT").unwrap_or_else(|| "production".to_string()),
        })
    }
}

/// FCM v1 service-account credentials.
#[derive(Debug, Clone)]
pub struct FcmSecrets {
    pub project_id: String,
    pub client_email: String,
    /// PKCS8 PEM private key.
    pub private_key: String,
}

impl FcmSecrets {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            project_id: opt("FCM_PROJECT_ID")?,
            client_email: opt("FCM_CLIENT_EMAIL")?,
            private_key: opt("FCM_PRIVATE_KEY")?,
        })
    }
}

/// WebPush VAPID key pair.
#[derive(Debug, Clone)]
pub struct VapidSecrets {
    pub public_key: String,
    pub private_key: String,
    /// mailto: or https: contact.
    pub subject: String,
}

impl VapidSecrets {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            public_key: opt("VAPID_PUBLIC_KEY")?,
            private_key: opt("VAPID_PRIVATE_KEY")?,
            subject: opt("VAPID_SUBJECT")?,
        })
    }
}

/// Per-provider email credentials. Providers with missing keys are skipped
/// by the email router.
#[derive(Debug, Clone, Default)]
pub struct EmailSecrets {
    pub resend_api_key: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailSecrets {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: opt("RESEND_API_KEY"),
            sendgrid_api_key: opt("SENDGRID_API_KEY"),
            smtp_host: opt("SMTP_HOST"),
            smtp_username: opt("SMTP_USERNAME"),
            smtp_password: opt("SMTP_PASSWORD"),
        }
    }
}

/// AWS SigV4 credentials shared by SES and Amazon Translate.
#[derive(Debug, Clone)]
pub struct AwsSecrets {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl AwsSecrets {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: opt("AWS_ACCESS_KEY_ID")?,
            secret_access_key: opt("AWS_SECRET_ACCESS_KEY")?,
            region: opt("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

/// Translation provider endpoints and keys for the 5-tier stack.
#[derive(Debug, Clone, Default)]
pub struct TranslationSecrets {
    /// Self-hosted LLM endpoint (OpenAI-compatible chat completions).
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub deepl_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub microsoft_api_key: Option<String>,
    pub microsoft_region: Option<String>,
}

impl TranslationSecrets {
    pub fn from_env() -> Self {
        Self {
            llm_endpoint: opt("LLM_TRANSLATE_ENDPOINT"),
            llm_api_key: opt("LLM_TRANSLATE_API_KEY"),
            deepl_api_key: opt("DEEPL_API_KEY"),
            google_api_key: opt("GOOGLE_TRANSLATE_API_KEY"),
            microsoft_api_key: opt("AZURE_TRANSLATOR_KEY"),
            microsoft_region: opt("AZURE_TRANSLATOR_REGION"),
        }
    }
}

/// The full secret bundle loaded once at startup.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub apns: Option<ApnsSecrets>,
    pub fcm: Option<FcmSecrets>,
    pub vapid: Option<VapidSecrets>,
    pub email: EmailSecrets,
    pub aws: Option<AwsSecrets>,
    pub translation: TranslationSecrets,
    /// Shared secret for cron/operational endpoints.
    pub cron_secret: Option<String>,
    /// HS256 secret for caller JWTs.
    pub jwt_secret: Option<String>,
    /// Per-provider webhook signing secrets (provider name -> secret).
    pub webhook_secrets: std::collections::HashMap<String, String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let mut webhook_secrets = std::collections::HashMap::new();
        for provider in ["resend", "sendgrid", "ses"] {
            let var = format!("{}_WEBHOOK_SECRET", provider.to_uppercase());
            if let Some(secret) = opt(&var) {
                webhook_secrets.insert(provider.to_string(), secret);
            }
        }
        Self {
            apns: ApnsSecrets::from_env(),
            fcm: FcmSecrets::from_env(),
            vapid: VapidSecrets::from_env(),
            email: EmailSecrets::from_env(),
            aws: AwsSecrets::from_env(),
            translation: TranslationSecrets::from_env(),
            cron_secret: opt("CRON_SECRET"),
            jwt_secret: opt("JWT_SECRET"),
            webhook_secrets,
        }
    }

    /// Server startup requires the caller-auth secret; worker startup does not.
    pub fn require_jwt_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnv("JWT_SECRET".to_string()))
    }

    pub fn require_cron_secret(&self) -> Result<&str, ConfigError> {
        self.cron_secret
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnv("CRON_SECRET".to_string()))
    }
}

// Kept for call sites that need a hard failure on a single missing var.
pub(crate) fn require_env(name: &str) -> Result<String, ConfigError> {
    required(name)
}
