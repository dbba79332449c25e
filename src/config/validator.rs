use crate::config::Config;
use crate::error::{QuarryError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_enrich(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_build(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.min_words == 0 {
            errors.push(ValidationError::new(
                "chunking.min_words",
                "Minimum word count must be greater than 0",
            ));
        }

        if chunking.max_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.max_tokens",
                "Maximum token count must be greater than 0",
            ));
        }

        // min_words words must fit inside the token budget, or the chunk
        // bounds cannot both hold (~6 chars per word, ~4 chars per token).
        if chunking.min_words * 6 > chunking.max_tokens * 4 {
            errors.push(ValidationError::new(
                "chunking.min_words",
                format!(
                    "min_words {} cannot be satisfied within max_tokens {}",
                    chunking.min_words, chunking.max_tokens
                ),
            ));
        }

        if chunking.boundary_tolerance >= chunking.max_tokens {
            errors.push(ValidationError::new(
                "chunking.boundary_tolerance",
                "Boundary tolerance must be smaller than max_tokens",
            ));
        }
    }

    fn validate_enrich(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.enrich.doc_input_words == 0 {
            errors.push(ValidationError::new(
                "enrich.doc_input_words",
                "Document summary input words must be greater than 0",
            ));
        }

        if config.enrich.context_words == 0 {
            errors.push(ValidationError::new(
                "enrich.context_words",
                "Context window words must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent_batches == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent_batches",
                "Concurrent batch limit must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.oversample == 0 {
            errors.push(ValidationError::new(
                "retrieval.oversample",
                "Oversample factor must be at least 1",
            ));
        }

        if retrieval.ef_search == 0 {
            errors.push(ValidationError::new(
                "retrieval.ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if retrieval.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.timeout_ms",
                "Retrieval timeout must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.default_alpha) {
            errors.push(ValidationError::new(
                "retrieval.default_alpha",
                format!(
                    "Alpha must be between 0.0 and 1.0, got {}",
                    retrieval.default_alpha
                ),
            ));
        }

        if retrieval.default_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                "Default k must be greater than 0",
            ));
        }
    }

    fn validate_build(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.build.doc_workers == 0 {
            errors.push(ValidationError::new(
                "build.doc_workers",
                "Document worker count must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn unsatisfiable_chunk_bounds_are_rejected() {
        let mut config = Config::default();
        config.chunking.min_words = 2000;
        config.chunking.max_tokens = 100;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.retrieval.default_alpha = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn zero_oversample_is_rejected() {
        let mut config = Config::default();
        config.retrieval.oversample = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn empty_model_name_is_rejected() {
        let mut config = Config::default();
        config.embedding.model = String::new();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
