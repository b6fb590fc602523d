//! Model registry.
//!
//! A closed, process-static table of the models this dispatcher serves.
//! Requests naming an unknown model are rejected, and workers must declare
//! a model whose metadata fingerprint matches the registry exactly before
//! they are handed any work — a provider running a different quantization
//! or context window would return results the requester did not ask for.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Metadata fingerprint of a model build.
///
/// Two engines serve the same model iff every field here is equal; the
/// upstream `created` timestamp lives outside the fingerprint and is
/// ignored during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub vocab_type: i64,
    pub n_vocab: i64,
    pub n_ctx_train: i64,
    pub n_embd: i64,
    pub n_params: i64,
    pub size: i64,
}

/// A served model, in the shape the `/v1/models` listing exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub meta: ModelMeta,
}

/// A worker's self-declared model, as carried in `fetch_task` requests.
#[derive(Debug, Clone, Deserialize)]
pub struct DeclaredModel {
    pub id: String,
    #[serde(default)]
    pub meta: Option<ModelMeta>,
}

/// The `{data: [...]}` listing shape a worker's local engine reports.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDeclaration {
    pub data: Vec<DeclaredModel>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable model table, built once at startup.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Build a registry over an explicit model table.
    ///
    /// The first entry becomes the default model for requests that omit the
    /// model path segment.
    #[must_use]
    pub fn new(models: Vec<ModelSpec>) -> Self {
        assert!(!models.is_empty(), "registry requires at least one model");
        Self { models }
    }

    /// The builtin production model table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![ModelSpec {
            id: "sakura-14b-qwen2.5-v1.0-iq4xs".into(),
            object: "model".into(),
            created: 0,
            owned_by: "llamacpp".into(),
            meta: ModelMeta {
                vocab_type: 2,
                n_vocab: 152_064,
                n_ctx_train: 131_072,
                n_embd: 5_120,
                n_params: 14_770_033_664,
                size: 8_180_228_096,
            },
        }])
    }

    /// Whether `id` names a served model.
    pub fn has(&self, id: &str) -> bool {
        self.models.iter().any(|m| m.id == id)
    }

    /// Look up a model by id.
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Id of the default model.
    pub fn default_id(&self) -> &str {
        &self.models[0].id
    }

    /// All served models, listing order.
    pub fn specs(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Check a single worker-declared model: the id must be known and the
    /// declared metadata must equal the registry fingerprint field for
    /// field. A declaration without metadata never verifies.
    pub fn verify_model(&self, declared: &DeclaredModel) -> bool {
        let Some(spec) = self.get(&declared.id) else {
            return false;
        };
        declared.meta.is_some_and(|meta| meta == spec.meta)
    }

    /// Check a full `{data: [...]}` declaration: non-empty, and every entry
    /// verifies.
    pub fn verify(&self, declaration: &ModelDeclaration) -> bool {
        !declaration.data.is_empty()
            && declaration.data.iter().all(|m| self.verify_model(m))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(id: &str, meta: Option<ModelMeta>) -> DeclaredModel {
        DeclaredModel {
            id: id.into(),
            meta,
        }
    }

    #[test]
    fn builtin_has_default() {
        let registry = ModelRegistry::builtin();
        assert!(registry.has(registry.default_id()));
        assert!(!registry.has("gpt-4"));
        assert_eq!(registry.specs().len(), 1);
    }

    #[test]
    fn verify_requires_exact_meta() {
        let registry = ModelRegistry::builtin();
        let spec = registry.get(registry.default_id()).unwrap().clone();

        assert!(registry.verify_model(&declared(&spec.id, Some(spec.meta))));

        // A single field off by one fails verification.
        let mut off = spec.meta;
        off.n_ctx_train += 1;
        assert!(!registry.verify_model(&declared(&spec.id, Some(off))));

        // Missing metadata fails.
        assert!(!registry.verify_model(&declared(&spec.id, None)));

        // Unknown id fails even with matching metadata.
        assert!(!registry.verify_model(&declared("unknown", Some(spec.meta))));
    }

    #[test]
    fn verify_declaration_requires_all_entries() {
        let registry = ModelRegistry::builtin();
        let spec = registry.get(registry.default_id()).unwrap().clone();

        let good = ModelDeclaration {
            data: vec![declared(&spec.id, Some(spec.meta))],
        };
        assert!(registry.verify(&good));

        let empty = ModelDeclaration { data: vec![] };
        assert!(!registry.verify(&empty));

        let mixed = ModelDeclaration {
            data: vec![
                declared(&spec.id, Some(spec.meta)),
                declared("unknown", None),
            ],
        };
        assert!(!registry.verify(&mixed));
    }

    #[test]
    fn declared_model_parses_from_wire_json() {
        let declared: DeclaredModel = serde_json::from_value(serde_json::json!({
            "id": "sakura-14b-qwen2.5-v1.0-iq4xs",
            "meta": {
                "vocab_type": 2,
                "n_vocab": 152064,
                "n_ctx_train": 131072,
                "n_embd": 5120,
                "n_params": 14770033664u64,
                "size": 8180228096u64
            }
        }))
        .unwrap();

        assert!(ModelRegistry::builtin().verify_model(&declared));
    }
}
