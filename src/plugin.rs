//! Engine plugin wiring the dialect adapters into connection events.
//!
//! An engine is created from a URL; when it is asked to load the plugin named
//! [`PLUGIN_NAME`], the plugin reads its `spatial_<event>_<backend>_<name>`
//! query parameters, removes them from the URL handed to the driver and, once
//! the engine exists, registers the adapter's connect hook (and, for MySQL and
//! MariaDB, a before-execute hook).
//!
//! ```
//! use spatial_dialects::plugin::SqliteEngine;
//!
//! let engine = SqliteEngine::create("gpkg:///:memory:", &["spatial"])?;
//! let conn = engine.connect()?;
//! let count: i64 = conn.query_row("SELECT count(*) FROM gpkg_spatial_ref_sys", [], |row| row.get(0))?;
//! assert_eq!(count, 3);
//! # Ok::<(), spatial_dialects::SpatialError>(())
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use url::Url;

use crate::connection::RawConnection;
use crate::dialect::{
    Backend, GeoPackageDialect, GeoPackageMode, InitMode, JournalMode, MariaDbDialect,
    MySqlDialect, PostgisOptions, PostgresDialect, SpatialDialect, SpatialiteOptions,
    SqliteDialect,
};
use crate::error::{Result, SpatialError};

/// Name under which the plugin is requested.
pub const PLUGIN_NAME: &str = "spatial";

const SQLITE_TRANSACTION: &str = "spatial_connect_sqlite_transaction";
const SQLITE_INIT_MODE: &str = "spatial_connect_sqlite_init_mode";
const SQLITE_JOURNAL_MODE: &str = "spatial_connect_sqlite_journal_mode";
const GEOPACKAGE_MODE: &str = "spatial_connect_geopackage_mode";
const POSTGRESQL_CREATE_EXTENSION: &str = "spatial_connect_postgresql_create_extension";
const MYSQL_CONVERT: &str = "spatial_before_cursor_execute_mysql_convert";
const MARIADB_CONVERT: &str = "spatial_before_cursor_execute_mariadb_convert";

const PARAMETERS: [&str; 7] = [
    SQLITE_TRANSACTION,
    SQLITE_INIT_MODE,
    SQLITE_JOURNAL_MODE,
    GEOPACKAGE_MODE,
    POSTGRESQL_CREATE_EXTENSION,
    MYSQL_CONVERT,
    MARIADB_CONVERT,
];

pub type ConnectHook = Box<dyn Fn(&dyn RawConnection) -> Result<()> + Send + Sync>;
pub type BeforeExecuteHook = Box<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// The event surface of an engine.
pub trait Engine {
    fn backend(&self) -> Backend;

    /// Whether hooks were already registered under `name`.
    fn has_listener(&self, name: &str) -> bool;

    /// Run `hook` on every new connection.
    fn listen_connect(&mut self, name: &str, hook: ConnectHook);

    /// Pass the parameters of every statement through `hook`.
    fn listen_before_execute(&mut self, name: &str, hook: BeforeExecuteHook);
}

/// Plugin parameters read from the engine URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginParams {
    pub sqlite: SpatialiteOptions,
    pub geopackage_mode: GeoPackageMode,
    pub postgis: PostgisOptions,
    pub mysql_convert: bool,
    pub mariadb_convert: bool,
}

impl Default for PluginParams {
    fn default() -> Self {
        Self {
            sqlite: SpatialiteOptions::new(),
            geopackage_mode: GeoPackageMode::Native,
            postgis: PostgisOptions::new(),
            mysql_convert: true,
            mariadb_convert: true,
        }
    }
}

impl PluginParams {
    /// Read every `spatial_*` parameter of `url`; unknown names are rejected.
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut params = Self::default();
        for (name, value) in url.query_pairs() {
            match &*name {
                SQLITE_TRANSACTION => params.sqlite.transaction = str_to_bool(&name, &value)?,
                SQLITE_INIT_MODE => params.sqlite.init_mode = Some(value.parse::<InitMode>()?),
                SQLITE_JOURNAL_MODE => {
                    params.sqlite.journal_mode = Some(value.parse::<JournalMode>()?)
                }
                GEOPACKAGE_MODE => params.geopackage_mode = value.parse()?,
                POSTGRESQL_CREATE_EXTENSION => {
                    params.postgis.create_extension = str_to_bool(&name, &value)?
                }
                MYSQL_CONVERT => params.mysql_convert = str_to_bool(&name, &value)?,
                MARIADB_CONVERT => params.mariadb_convert = str_to_bool(&name, &value)?,
                other if other.starts_with("spatial_") => {
                    return Err(SpatialError::InvalidPluginArgument {
                        name: other.to_string(),
                        value: value.into_owned(),
                    });
                }
                _ => {}
            }
        }
        Ok(params)
    }

    /// The adapter for `backend` configured with these parameters.
    pub fn dialect(&self, backend: Backend) -> Arc<dyn SpatialDialect> {
        match backend {
            Backend::PostgreSQL => Arc::new(PostgresDialect::new(self.postgis)),
            Backend::MySQL => Arc::new(MySqlDialect),
            Backend::MariaDB => Arc::new(MariaDbDialect::new(self.mariadb_convert)),
            Backend::SQLite => Arc::new(SqliteDialect::new(self.sqlite.clone())),
            Backend::GeoPackage => {
                let mut dialect = GeoPackageDialect::new(self.geopackage_mode);
                if let Some(path) = &self.sqlite.library_path {
                    dialect = dialect.with_library_path(path.clone());
                }
                Arc::new(dialect)
            }
        }
    }
}

/// Cast a plugin argument to a boolean.
pub fn str_to_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "t" | "1" | "enable" | "on" => Ok(true),
        "no" | "n" | "false" | "f" | "0" | "disable" | "off" => Ok(false),
        _ => Err(SpatialError::InvalidPluginArgument {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Attaches the spatial connection events to a new engine.
#[derive(Debug, Clone)]
pub struct SpatialEnginePlugin {
    backend: Backend,
    params: PluginParams,
    dialect: Arc<dyn SpatialDialect>,
}

impl SpatialEnginePlugin {
    pub fn new(url: &Url) -> Result<Self> {
        let backend = Backend::from_url_scheme(url.scheme())?;
        let params = PluginParams::from_url(url)?;
        let dialect = params.dialect(backend);
        Ok(Self {
            backend,
            params,
            dialect,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn params(&self) -> &PluginParams {
        &self.params
    }

    /// The configured adapter.
    pub fn dialect(&self) -> Arc<dyn SpatialDialect> {
        Arc::clone(&self.dialect)
    }

    /// `url` without the plugin parameters, for the driver.
    pub fn update_url(&self, url: &Url) -> Url {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !PARAMETERS.contains(&&**name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        let mut url = url.clone();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        url
    }

    /// Register the hooks on `engine`. Returns `false` when the engine
    /// already carries them.
    pub fn engine_created(&self, engine: &mut dyn Engine) -> Result<bool> {
        if engine.backend() != self.backend {
            return Err(SpatialError::Configuration(format!(
                "plugin configured for {} attached to a {} engine",
                self.backend,
                engine.backend()
            )));
        }
        if engine.has_listener(PLUGIN_NAME) {
            tracing::debug!(backend = %self.backend, "spatial hooks already registered");
            return Ok(false);
        }

        let dialect = self.dialect();
        engine.listen_connect(
            PLUGIN_NAME,
            Box::new(move |conn| dialect.setup_connection(conn)),
        );

        let convert = match self.backend {
            Backend::MySQL => Some(self.params.mysql_convert),
            Backend::MariaDB => Some(self.params.mariadb_convert),
            _ => None,
        };
        if let Some(convert) = convert {
            let dialect = self.dialect();
            engine.listen_before_execute(
                PLUGIN_NAME,
                Box::new(move |params| {
                    if convert {
                        dialect.prepare_parameters(params)
                    } else {
                        params
                    }
                }),
            );
        }
        tracing::debug!(backend = %self.backend, "registered spatial hooks");
        Ok(true)
    }
}

/// Engine for the SQLite and GeoPackage backends.
pub struct SqliteEngine {
    url: Url,
    backend: Backend,
    connect_hooks: Vec<(String, ConnectHook)>,
    before_execute_hooks: Vec<(String, BeforeExecuteHook)>,
}

impl SqliteEngine {
    /// Create an engine from a `sqlite://` or `gpkg://` URL, loading the
    /// requested plugins.
    ///
    /// As with SQLAlchemy URLs, `sqlite:///relative.db` and
    /// `sqlite:////absolute.db` name files, and an empty path or `:memory:`
    /// opens an in-memory database.
    pub fn create(url: &str, plugins: &[&str]) -> Result<Self> {
        let url = Url::parse(url)?;
        let backend = Backend::from_url_scheme(url.scheme())?;
        if !matches!(backend, Backend::SQLite | Backend::GeoPackage) {
            return Err(SpatialError::Configuration(format!(
                "{backend} engines need their own driver"
            )));
        }
        if let Some(unknown) = plugins.iter().find(|name| **name != PLUGIN_NAME) {
            return Err(SpatialError::Configuration(format!("unknown plugin: {unknown}")));
        }

        let mut engine = Self {
            url: url.clone(),
            backend,
            connect_hooks: Vec::new(),
            before_execute_hooks: Vec::new(),
        };
        if plugins.contains(&PLUGIN_NAME) {
            let plugin = SpatialEnginePlugin::new(&url)?;
            engine.url = plugin.update_url(&url);
            plugin.engine_created(&mut engine)?;
        }
        Ok(engine)
    }

    /// URL as seen by the driver, without plugin parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Database file, `None` for an in-memory database.
    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self.url.path();
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }

    /// Open a connection and run the connect hooks on it.
    pub fn connect(&self) -> Result<Connection> {
        let conn = match self.database_path() {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        for (name, hook) in &self.connect_hooks {
            tracing::debug!(hook = %name, "running connect hook");
            hook(&conn as &dyn RawConnection)?;
        }
        Ok(conn)
    }

    /// Execute one statement after the before-execute hooks saw its
    /// parameters.
    pub fn execute(&self, conn: &Connection, sql: &str, params: Vec<Value>) -> Result<usize> {
        let params = self
            .before_execute_hooks
            .iter()
            .fold(params, |params, (_, hook)| hook(params));
        Ok(conn.execute(sql, params_from_iter(params.iter()))?)
    }
}

impl Engine for SqliteEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn has_listener(&self, name: &str) -> bool {
        self.connect_hooks.iter().any(|(hook, _)| hook == name)
            || self.before_execute_hooks.iter().any(|(hook, _)| hook == name)
    }

    fn listen_connect(&mut self, name: &str, hook: ConnectHook) {
        self.connect_hooks.push((name.to_string(), hook));
    }

    fn listen_before_execute(&mut self, name: &str, hook: BeforeExecuteHook) {
        self.before_execute_hooks.push((name.to_string(), hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::connection::tests::MockConnection;
    use crate::ddl::{Column, Table, create_table};
    use crate::expr::Expr;
    use crate::types::{SpatialType, SqlType};

    #[derive(Default)]
    struct RecordingEngine {
        backend: Option<Backend>,
        connect: Vec<(String, ConnectHook)>,
        before_execute: Vec<(String, BeforeExecuteHook)>,
    }

    impl RecordingEngine {
        fn new(backend: Backend) -> Self {
            Self {
                backend: Some(backend),
                ..Self::default()
            }
        }
    }

    impl Engine for RecordingEngine {
        fn backend(&self) -> Backend {
            self.backend.unwrap_or(Backend::SQLite)
        }

        fn has_listener(&self, name: &str) -> bool {
            self.connect.iter().any(|(hook, _)| hook == name)
        }

        fn listen_connect(&mut self, name: &str, hook: ConnectHook) {
            self.connect.push((name.to_string(), hook));
        }

        fn listen_before_execute(&mut self, name: &str, hook: BeforeExecuteHook) {
            self.before_execute.push((name.to_string(), hook));
        }
    }

    fn plugin(url: &str) -> Result<SpatialEnginePlugin> {
        SpatialEnginePlugin::new(&Url::parse(url)?)
    }

    #[test]
    fn parameters_are_consumed() -> Result<()> {
        let url = Url::parse(
            "sqlite:///test.db?spatial_connect_sqlite_init_mode=WGS84\
             &spatial_connect_sqlite_transaction=yes\
             &spatial_connect_sqlite_journal_mode=off&timeout=5",
        )?;
        let plugin = SpatialEnginePlugin::new(&url)?;
        let sqlite = &plugin.params().sqlite;
        assert!(sqlite.transaction);
        assert_eq!(sqlite.init_mode, Some(InitMode::Wgs84));
        assert_eq!(sqlite.journal_mode, Some(JournalMode::Off));
        assert_eq!(plugin.update_url(&url).as_str(), "sqlite:///test.db?timeout=5");

        let url = Url::parse("gpkg:///test.gpkg?spatial_connect_geopackage_mode=spatialite")?;
        let plugin = SpatialEnginePlugin::new(&url)?;
        assert_eq!(plugin.params().geopackage_mode, GeoPackageMode::Spatialite);
        assert_eq!(plugin.update_url(&url).as_str(), "gpkg:///test.gpkg");
        Ok(())
    }

    #[test]
    fn booleans() -> Result<()> {
        for value in ["yes", "Y", "true", "T", "1", "enable", "ON"] {
            assert!(str_to_bool("x", value)?);
        }
        for value in ["no", "N", "false", "f", "0", "disable", "off"] {
            assert!(!str_to_bool("x", value)?);
        }
        assert!(str_to_bool("x", "maybe").is_err());
        Ok(())
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        for url in [
            "sqlite:///t.db?spatial_connect_sqlite_transaction=maybe",
            "sqlite:///t.db?spatial_connect_sqlite_init_mode=FULL",
            "sqlite:///t.db?spatial_connect_sqlite_journal_mode=fast",
            "gpkg:///t.gpkg?spatial_connect_geopackage_mode=other",
            "mysql://host/db?spatial_connect_mysql_bogus=1",
        ] {
            assert!(
                matches!(plugin(url), Err(SpatialError::InvalidPluginArgument { .. })),
                "{url}"
            );
        }
        assert!(matches!(
            plugin("oracle://host/db"),
            Err(SpatialError::UnknownBackend(_))
        ));
    }

    #[test]
    fn registration_happens_once() -> Result<()> {
        let plugin = plugin("postgresql+psycopg2://host/db")?;
        let mut engine = RecordingEngine::new(Backend::PostgreSQL);
        assert!(plugin.engine_created(&mut engine)?);
        assert!(!plugin.engine_created(&mut engine)?);
        assert_eq!(engine.connect.len(), 1);
        assert!(engine.before_execute.is_empty());

        let mut other = RecordingEngine::new(Backend::MySQL);
        assert!(matches!(
            plugin.engine_created(&mut other),
            Err(SpatialError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn connect_hook_runs_the_configured_setup() -> Result<()> {
        let plugin =
            plugin("postgresql://host/db?spatial_connect_postgresql_create_extension=true")?;
        let mut engine = RecordingEngine::new(Backend::PostgreSQL);
        plugin.engine_created(&mut engine)?;
        let conn = MockConnection::default();
        (engine.connect[0].1)(&conn as &dyn RawConnection)?;
        assert_eq!(conn.executed(), vec!["CREATE EXTENSION IF NOT EXISTS postgis"]);
        Ok(())
    }

    #[test]
    fn mariadb_parameters_become_hex() -> Result<()> {
        let wkb = hex::decode("0101000000000000000000f03f0000000000000040")?;
        let params = vec![Value::Blob(wkb), Value::Integer(1)];

        let mut engine = RecordingEngine::new(Backend::MariaDB);
        plugin("mariadb://host/db")?.engine_created(&mut engine)?;
        assert_eq!(
            (engine.before_execute[0].1)(params.clone()),
            vec![
                Value::Text("0101000000000000000000f03f0000000000000040".into()),
                Value::Integer(1)
            ]
        );

        let mut engine = RecordingEngine::new(Backend::MariaDB);
        plugin("mariadb://host/db?spatial_before_cursor_execute_mariadb_convert=off")?
            .engine_created(&mut engine)?;
        assert_eq!((engine.before_execute[0].1)(params.clone()), params);
        Ok(())
    }

    #[test]
    fn sqlite_engine_paths() -> Result<()> {
        let engine = SqliteEngine::create("sqlite:///data/test.db", &[])?;
        assert_eq!(engine.database_path(), Some(PathBuf::from("data/test.db")));
        let engine = SqliteEngine::create("sqlite:////tmp/test.db", &[])?;
        assert_eq!(engine.database_path(), Some(PathBuf::from("/tmp/test.db")));
        let engine = SqliteEngine::create("sqlite:///:memory:", &[])?;
        assert_eq!(engine.database_path(), None);
        assert!(!engine.has_listener(PLUGIN_NAME));

        assert!(matches!(
            SqliteEngine::create("postgresql://host/db", &["spatial"]),
            Err(SpatialError::Configuration(_))
        ));
        assert!(matches!(
            SqliteEngine::create("sqlite:///:memory:", &["other"]),
            Err(SpatialError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn geopackage_engine_end_to_end() -> Result<()> {
        let engine = SqliteEngine::create(
            "gpkg:///:memory:?spatial_connect_geopackage_mode=native",
            &[PLUGIN_NAME],
        )?;
        assert!(engine.has_listener(PLUGIN_NAME));
        assert_eq!(engine.url().as_str(), "gpkg:///:memory:");

        let conn = engine.connect()?;
        let plugin = plugin("gpkg:///:memory:")?;
        let dialect = plugin.dialect();
        let table = Table::new("poi")
            .column(Column::new("fid", SqlType::Integer).primary_key())
            .column(Column::spatial("geom", SpatialType::point(4326)));
        create_table(dialect.as_ref(), &table)?.execute(&conn)?;

        let insert = Compiler::new(dialect.as_ref())
            .compile_insert(&table, vec![("geom", Expr::from("POINT(1 2)"))])?;
        assert_eq!(engine.execute(&conn, &insert.sql, insert.params)?, 1);

        let select = Compiler::new(dialect.as_ref()).compile_select(
            &[Expr::column("poi", "geom", SpatialType::point(4326))],
            &table,
            None,
        )?;
        let raw: Value = conn.query_row(&select.sql, [], |row| row.get(0))?;
        let row = select.decode_row(dialect.as_ref(), vec![raw])?;
        let crate::compiler::ResultValue::Spatial(Some(element)) = &row[0] else {
            panic!("expected a point");
        };
        assert_eq!(element.srid(), 4326);
        assert_eq!(element.shape()?.to_string(), "POINT(1 2)");
        Ok(())
    }
}
