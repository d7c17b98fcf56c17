mod translator;

pub use translator::{ColumnOverride, QueryTranslator, TranslatedQuery, TranslatorError};

use std::sync::Arc;

use crate::parser::kill_target;

/// Where one statement of a batch goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Known query: run the rewritten SQL and rename columns
    Translated(Arc<TranslatedQuery>),
    /// Answer with a canned OK without touching the backend
    Bypass,
    /// Terminate another proxy connection by id
    Kill(u32),
    /// Session statement handling, then the backend
    Execute,
}

impl Route {
    /// Label used in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Route::Translated(_) => "translated",
            Route::Bypass => "bypass",
            Route::Kill(_) => "kill",
            Route::Execute => "execute",
        }
    }
}

/// Statement router
///
/// Priority per statement: translation table, bypass set, `KILL`, then
/// execution (where session statements are answered locally).
#[derive(Debug, Clone, Default)]
pub struct Router {
    translator: QueryTranslator,
}

impl Router {
    pub fn new(translator: QueryTranslator) -> Self {
        Self { translator }
    }

    pub fn route(&self, sql: &str) -> Route {
        if let Some(translated) = self.translator.translate(sql) {
            return Route::Translated(translated);
        }
        if self.translator.is_bypass(sql) {
            return Route::Bypass;
        }
        if let Some(id) = kill_target(sql) {
            return Route::Kill(id);
        }
        Route::Execute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_priority() {
        let mut translator = QueryTranslator::builtin();
        translator.add(TranslatedQuery::new("show tables", "SELECT 'x' AS t"));
        let router = Router::new(translator);

        assert!(matches!(router.route("show tables"), Route::Translated(_)));
        assert_eq!(router.route("show databases"), Route::Bypass);
        assert_eq!(router.route("SET autocommit = 0"), Route::Execute);
        assert_eq!(router.route("KILL CONNECTION 12"), Route::Kill(12));
        assert_eq!(router.route("SELECT * FROM t"), Route::Execute);
    }

    #[test]
    fn test_route_kinds() {
        let router = Router::default();
        assert_eq!(router.route("SELECT @@session.transaction_read_only").kind(), "translated");
        assert_eq!(router.route("show databases").kind(), "bypass");
        assert_eq!(router.route("KILL 3").kind(), "kill");
        assert_eq!(router.route("SELECT 1").kind(), "execute");
    }
}
