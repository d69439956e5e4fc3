//! Text codecs for Postgres types sqlx has no built-in mapping for.
//!
//! `tsvector`, `tsquery` and `regclass` all round-trip cleanly through their
//! text representation; the newtypes below carry the proper type name so
//! sqlx resolves the OID against the live catalog on first use, which also
//! covers types created after the pool connected (extension installs).
//! The `vector` type itself is handled by the pgvector crate.

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};

/// Codec for pgvector's `vector` type, usable once the extension's OID has
/// been probed on connect.
pub use pgvector::Vector;

macro_rules! text_mapped_type {
    ($name:ident, $pg_type:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Type<Postgres> for $name {
            fn type_info() -> PgTypeInfo {
                PgTypeInfo::with_name($pg_type)
            }
        }

        impl<'r> Decode<'r, Postgres> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let text = <&str as Decode<Postgres>>::decode(value)?;
                Ok(Self(text.to_string()))
            }
        }

        impl<'q> Encode<'q, Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut PgArgumentBuffer,
            ) -> Result<IsNull, BoxDynError> {
                <&str as Encode<Postgres>>::encode_by_ref(&self.0.as_str(), buf)
            }
        }
    };
}

text_mapped_type!(TsVector, "tsvector", "A `tsvector` value in its text form.");
text_mapped_type!(TsQuery, "tsquery", "A `tsquery` value in its text form.");
text_mapped_type!(RegClass, "regclass", "A `regclass` value in its text form.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_match_catalog() {
        assert_eq!(
            <TsVector as Type<Postgres>>::type_info().to_string(),
            "tsvector"
        );
        assert_eq!(
            <TsQuery as Type<Postgres>>::type_info().to_string(),
            "tsquery"
        );
        assert_eq!(
            <RegClass as Type<Postgres>>::type_info().to_string(),
            "regclass"
        );
    }

    #[test]
    fn display_roundtrip() {
        let v = TsVector::from("'cat':1 'dog':2".to_string());
        assert_eq!(v.to_string(), "'cat':1 'dog':2");
        assert_eq!(v.as_str(), "'cat':1 'dog':2");
    }
}
