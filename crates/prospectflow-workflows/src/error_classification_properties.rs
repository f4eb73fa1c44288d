//! Property-based tests for error classification

#[cfg(test)]
mod tests {
    use crate::error_catalog::*;
    use crate::models::ErrorDetails;
    use proptest::prelude::*;

    fn arb_unmatched_message() -> impl Strategy<Value = String> {
        // Digits and vowels only; no keyword rule can match
        "[aeiou0-35-9 ]{0,40}"
    }

    proptest! {
        /// The same message always maps to the same code
        #[test]
        fn prop_classification_is_deterministic(message in ".{0,80}") {
            let catalog = ErrorCatalog::new();
            let details = ErrorDetails::from(message.clone());
            prop_assert_eq!(classify_message(&message), classify_message(&message));
            prop_assert_eq!(catalog.identify(&details), catalog.identify(&details));
        }

        /// Classification ignores letter case
        #[test]
        fn prop_classification_ignores_case(message in "[a-zA-Z0-9 ]{0,60}") {
            prop_assert_eq!(
                classify_message(&message.to_uppercase()),
                classify_message(&message.to_lowercase())
            );
        }

        /// Messages matching no rule are system errors
        #[test]
        fn prop_unmatched_message_is_system_error(message in arb_unmatched_message()) {
            prop_assert_eq!(classify_message(&message), SYSTEM_ERROR);
        }

        /// Every classified code resolves to a registered definition
        #[test]
        fn prop_classified_code_is_registered(message in ".{0,80}") {
            let catalog = ErrorCatalog::new();
            let code = catalog.identify(&ErrorDetails::from(message));
            prop_assert!(catalog.contains(&code));
            prop_assert_eq!(catalog.resolve(&code).code, code);
        }

        /// An unregistered explicit code falls back to keyword rules
        #[test]
        fn prop_unregistered_code_is_ignored(code in "CUSTOM_[A-Z]{1,10}") {
            let catalog = ErrorCatalog::new();
            let details = ErrorDetails {
                code: Some(code),
                ..ErrorDetails::from("Request timed out")
            };
            prop_assert_eq!(catalog.identify(&details), ENRICHMENT_SERVICE_UNAVAILABLE);
        }
    }
}
