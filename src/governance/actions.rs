use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{KmsError, KmsResult};
use crate::keys::rotation::{KeyRotationPolicy, ROTATION_POLICY_KEY};
use crate::ledger::{
    LedgerKv, JWT_VALIDATION_MAP, RELEASE_POLICY_MAP, ROTATION_POLICY_MAP, SETTINGS_MAP,
};
use crate::release::{is_allowed_claim, ClaimScalar};
use crate::settings::{Settings, SETTINGS_KEY};

/// A governance action: `validate` is side-effect-free and runs for every
/// action of a proposal before any `apply` touches the ledger.
pub trait GovernanceAction: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, args: &Value) -> KmsResult<()>;
    fn apply(&self, ledger: &Arc<dyn LedgerKv>, args: &Value) -> KmsResult<()>;
}

/// Name -> action table, built once at startup and shared behind the state.
pub struct ActionRegistry {
    actions: HashMap<&'static str, Box<dyn GovernanceAction>>,
}

impl ActionRegistry {
    pub fn with_default_actions() -> Self {
        let mut actions: HashMap<&'static str, Box<dyn GovernanceAction>> = HashMap::new();
        for action in [
            Box::new(SetSettingsPolicy) as Box<dyn GovernanceAction>,
            Box::new(SetJwtValidationPolicy),
            Box::new(SetKeyReleasePolicy),
            Box::new(SetKeyRotationPolicy),
        ] {
            actions.insert(action.name(), action);
        }
        Self { actions }
    }

    pub fn get(&self, name: &str) -> Option<&dyn GovernanceAction> {
        self.actions.get(name).map(|action| action.as_ref())
    }
}

fn invalid(message: impl Into<String>) -> KmsError {
    KmsError::InputValidation(message.into())
}

fn require_object<'a>(args: &'a Value, field: &str) -> KmsResult<&'a Map<String, Value>> {
    args.get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(format!("{field} must be an object")))
}

fn require_str<'a>(args: &'a Value, field: &str) -> KmsResult<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{field} must be a string")))
}

fn scalar_from(value: &Value) -> KmsResult<ClaimScalar> {
    match value {
        Value::Bool(flag) => Ok(ClaimScalar::Bool(*flag)),
        Value::Number(number) => number
            .as_f64()
            .map(ClaimScalar::Num)
            .ok_or_else(|| invalid("numeric claim value out of range")),
        Value::String(text) => Ok(ClaimScalar::Str(text.clone())),
        _ => Err(invalid("claim values must be scalars")),
    }
}

pub struct SetSettingsPolicy;

impl GovernanceAction for SetSettingsPolicy {
    fn name(&self) -> &'static str {
        "set_settings_policy"
    }

    fn validate(&self, args: &Value) -> KmsResult<()> {
        let settings = require_object(args, "settings_policy")?;
        let service = settings
            .get("service")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("settings_policy.service must be an object"))?;
        for field in ["name", "description", "version"] {
            if !service.get(field).map(Value::is_string).unwrap_or(false) {
                return Err(invalid(format!("service.{field} must be a string")));
            }
        }
        if !service.get("debug").map(Value::is_boolean).unwrap_or(false) {
            return Err(invalid("service.debug must be a boolean"));
        }
        Ok(())
    }

    fn apply(&self, ledger: &Arc<dyn LedgerKv>, args: &Value) -> KmsResult<()> {
        let settings: Settings = serde_json::from_value(args["settings_policy"].clone())
            .map_err(|err| invalid(format!("settings_policy: {err}")))?;
        ledger.set(
            SETTINGS_MAP,
            SETTINGS_KEY,
            serde_json::to_vec(&settings).map_err(|err| KmsError::Internal(err.into()))?,
        );
        tracing::info!(debug = settings.service.debug, "settings policy applied");
        Ok(())
    }
}

pub struct SetJwtValidationPolicy;

impl GovernanceAction for SetJwtValidationPolicy {
    fn name(&self) -> &'static str {
        "set_jwt_validation_policy"
    }

    fn validate(&self, args: &Value) -> KmsResult<()> {
        require_str(args, "issuer")?;
        let policy = require_object(args, "validation_policy")?;
        for (claim, value) in policy {
            let ok = match value {
                Value::String(_) => true,
                Value::Array(values) => values.iter().all(Value::is_string),
                _ => false,
            };
            if !ok {
                return Err(invalid(format!(
                    "validation_policy.{claim} must be a string or string array"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, ledger: &Arc<dyn LedgerKv>, args: &Value) -> KmsResult<()> {
        let issuer = require_str(args, "issuer")?;
        let policy = args["validation_policy"].clone();
        // replace whatever was configured for this issuer
        ledger.delete(JWT_VALIDATION_MAP, issuer);
        ledger.set(
            JWT_VALIDATION_MAP,
            issuer,
            serde_json::to_vec(&policy).map_err(|err| KmsError::Internal(err.into()))?,
        );
        tracing::info!(%issuer, "token validation policy applied");
        Ok(())
    }
}

pub struct SetKeyReleasePolicy;

impl SetKeyReleasePolicy {
    fn validate_claims(claims: &Map<String, Value>) -> KmsResult<()> {
        for (name, value) in claims {
            if !is_allowed_claim(name) {
                return Err(invalid(format!("the claim {name} is not an allowed claim")));
            }
            match value {
                Value::Array(values) => {
                    for entry in values {
                        scalar_from(entry)?;
                    }
                }
                other => {
                    scalar_from(other)?;
                }
            }
        }
        Ok(())
    }

    fn validate_operator(claims: &Map<String, Value>, operator: &str) -> KmsResult<()> {
        for (name, value) in claims {
            if !is_allowed_claim(name) {
                return Err(invalid(format!("the claim {name} is not an allowed claim")));
            }
            if value.is_array() {
                return Err(invalid(format!(
                    "the operator claim {name} cannot be an array"
                )));
            }
            if !value.is_number() {
                return Err(invalid(format!("{operator}.{name} must be a number")));
            }
        }
        Ok(())
    }

    fn load_values(ledger: &Arc<dyn LedgerKv>, claim: &str) -> KmsResult<Option<Vec<ClaimScalar>>> {
        match ledger.get(RELEASE_POLICY_MAP, claim) {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| KmsError::Internal(err.into())),
            None => Ok(None),
        }
    }

    fn store_values(
        ledger: &Arc<dyn LedgerKv>,
        claim: &str,
        values: &[ClaimScalar],
    ) -> KmsResult<()> {
        ledger.set(
            RELEASE_POLICY_MAP,
            claim,
            serde_json::to_vec(values).map_err(|err| KmsError::Internal(err.into()))?,
        );
        Ok(())
    }

    fn incoming_values(value: &Value) -> KmsResult<Vec<ClaimScalar>> {
        match value {
            Value::Array(values) => values.iter().map(scalar_from).collect(),
            other => Ok(vec![scalar_from(other)?]),
        }
    }

    fn add_claims(ledger: &Arc<dyn LedgerKv>, claims: &Map<String, Value>) -> KmsResult<()> {
        for (name, value) in claims {
            let incoming = Self::incoming_values(value)?;
            let existing = Self::load_values(ledger, name)?;
            let merged = match existing {
                // booleans are single-value sets, an add replaces them
                Some(_) if matches!(incoming.first(), Some(ClaimScalar::Bool(_))) => incoming,
                Some(mut values) => {
                    values.extend(incoming);
                    values
                }
                None => incoming,
            };
            Self::store_values(ledger, name, &merged)?;
        }
        Ok(())
    }

    fn remove_claims(ledger: &Arc<dyn LedgerKv>, claims: &Map<String, Value>) -> KmsResult<()> {
        for (name, value) in claims {
            let incoming = Self::incoming_values(value)?;
            let Some(mut values) = Self::load_values(ledger, name)? else {
                return Err(invalid(format!(
                    "cannot remove values of {name}: not in the key release policy"
                )));
            };
            if matches!(incoming.first(), Some(ClaimScalar::Bool(_))) {
                ledger.delete(RELEASE_POLICY_MAP, name);
                continue;
            }
            for entry in &incoming {
                let index = values.iter().position(|value| value == entry).ok_or_else(|| {
                    invalid(format!("trying to remove a value of {name} that is not present"))
                })?;
                values.remove(index);
            }
            if values.is_empty() {
                ledger.delete(RELEASE_POLICY_MAP, name);
            } else {
                Self::store_values(ledger, name, &values)?;
            }
        }
        Ok(())
    }

    fn load_operator(
        ledger: &Arc<dyn LedgerKv>,
        operator: &str,
    ) -> KmsResult<BTreeMap<String, f64>> {
        match ledger.get(RELEASE_POLICY_MAP, operator) {
            Some(raw) => serde_json::from_slice(&raw).map_err(|err| KmsError::Internal(err.into())),
            None => Ok(BTreeMap::new()),
        }
    }

    fn add_operator(
        ledger: &Arc<dyn LedgerKv>,
        operator: &str,
        claims: &Map<String, Value>,
    ) -> KmsResult<()> {
        let mut thresholds = Self::load_operator(ledger, operator)?;
        for (name, value) in claims {
            let threshold = value
                .as_f64()
                .ok_or_else(|| invalid(format!("{operator}.{name} must be a number")))?;
            thresholds.insert(name.clone(), threshold);
        }
        ledger.set(
            RELEASE_POLICY_MAP,
            operator,
            serde_json::to_vec(&thresholds).map_err(|err| KmsError::Internal(err.into()))?,
        );
        Ok(())
    }

    fn remove_operator(
        ledger: &Arc<dyn LedgerKv>,
        operator: &str,
        claims: &Map<String, Value>,
    ) -> KmsResult<()> {
        if !ledger.has(RELEASE_POLICY_MAP, operator) {
            return Err(invalid(format!(
                "the key {operator} does not exist in the key release policy"
            )));
        }
        let mut thresholds = Self::load_operator(ledger, operator)?;
        for name in claims.keys() {
            if thresholds.remove(name).is_none() {
                return Err(invalid(format!(
                    "the claim {name} does not exist in the key release policy"
                )));
            }
        }
        if thresholds.is_empty() {
            ledger.delete(RELEASE_POLICY_MAP, operator);
        } else {
            ledger.set(
                RELEASE_POLICY_MAP,
                operator,
                serde_json::to_vec(&thresholds).map_err(|err| KmsError::Internal(err.into()))?,
            );
        }
        Ok(())
    }
}

impl GovernanceAction for SetKeyReleasePolicy {
    fn name(&self) -> &'static str {
        "set_key_release_policy"
    }

    fn validate(&self, args: &Value) -> KmsResult<()> {
        let kind = require_str(args, "type")?;
        if kind != "add" && kind != "remove" {
            return Err(invalid(format!(
                "key release policy type {kind} is not supported"
            )));
        }
        Self::validate_claims(require_object(args, "claims")?)?;
        for operator in ["gt", "gte"] {
            if let Some(value) = args.get(operator) {
                let claims = value
                    .as_object()
                    .ok_or_else(|| invalid(format!("{operator} must be an object")))?;
                Self::validate_operator(claims, operator)?;
            }
        }
        Ok(())
    }

    fn apply(&self, ledger: &Arc<dyn LedgerKv>, args: &Value) -> KmsResult<()> {
        let kind = require_str(args, "type")?;
        let claims = require_object(args, "claims")?;
        match kind {
            "add" => {
                Self::add_claims(ledger, claims)?;
                for operator in ["gte", "gt"] {
                    if let Some(value) = args.get(operator).and_then(Value::as_object) {
                        Self::add_operator(ledger, operator, value)?;
                    }
                }
            }
            "remove" => {
                Self::remove_claims(ledger, claims)?;
                for operator in ["gte", "gt"] {
                    if let Some(value) = args.get(operator).and_then(Value::as_object) {
                        Self::remove_operator(ledger, operator, value)?;
                    }
                }
            }
            other => return Err(invalid(format!("unsupported type {other}"))),
        }
        tracing::info!(kind, "key release policy applied");
        Ok(())
    }
}

pub struct SetKeyRotationPolicy;

impl GovernanceAction for SetKeyRotationPolicy {
    fn name(&self) -> &'static str {
        "set_key_rotation_policy"
    }

    fn validate(&self, args: &Value) -> KmsResult<()> {
        let policy = require_object(args, "key_rotation_policy")?;
        for field in ["rotation_interval_seconds", "grace_period_seconds"] {
            let value = policy
                .get(field)
                .and_then(Value::as_i64)
                .ok_or_else(|| invalid(format!("{field} must be an integer")))?;
            if value < 0 {
                return Err(invalid(format!("{field} must not be negative")));
            }
        }
        Ok(())
    }

    fn apply(&self, ledger: &Arc<dyn LedgerKv>, args: &Value) -> KmsResult<()> {
        let policy: KeyRotationPolicy = serde_json::from_value(args["key_rotation_policy"].clone())
            .map_err(|err| invalid(format!("key_rotation_policy: {err}")))?;
        ledger.set(
            ROTATION_POLICY_MAP,
            ROTATION_POLICY_KEY,
            serde_json::to_vec(&policy).map_err(|err| KmsError::Internal(err.into()))?,
        );
        tracing::info!(
            interval = policy.rotation_interval_seconds,
            grace = policy.grace_period_seconds,
            "key rotation policy applied"
        );
        Ok(())
    }
}
