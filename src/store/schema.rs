pub const SCHEMA: &str = r#"
-- Tenants own everything below them
CREATE TABLE IF NOT EXISTS tenants (
    tenant_id TEXT PRIMARY KEY CHECK (tenant_id <> ''),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT NOT NULL CHECK (project_id <> ''),
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id) ON DELETE CASCADE,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (project_id, tenant_id)
);

CREATE TABLE IF NOT EXISTS catalogs (
    catalog_id TEXT NOT NULL,
    name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 128 AND name NOT GLOB '*[^A-Za-z0-9_-]*'),
    description TEXT,
    info TEXT CHECK (info IS NULL OR json_valid(info)),
    project_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (catalog_id, tenant_id),
    UNIQUE (tenant_id, project_id, name),
    FOREIGN KEY (project_id, tenant_id) REFERENCES projects(project_id, tenant_id) ON DELETE CASCADE
);

-- Directory ids are assigned up front; the directory rows reference the variant
CREATE TABLE IF NOT EXISTS variants (
    variant_id TEXT NOT NULL,
    name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 128 AND name NOT GLOB '*[^A-Za-z0-9_-]*'),
    description TEXT,
    info TEXT CHECK (info IS NULL OR json_valid(info)),
    catalog_id TEXT NOT NULL,
    resource_directory TEXT NOT NULL,
    skillset_directory TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (variant_id, tenant_id),
    UNIQUE (name, catalog_id, tenant_id),
    FOREIGN KEY (catalog_id, tenant_id) REFERENCES catalogs(catalog_id, tenant_id) ON DELETE CASCADE
);

-- Namespaces partition directory paths under /--root--/<name>/
CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 128 AND name NOT GLOB '*[^A-Za-z0-9_-]*'),
    variant_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    description TEXT,
    info TEXT CHECK (info IS NULL OR json_valid(info)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (name, variant_id, tenant_id),
    FOREIGN KEY (variant_id, tenant_id) REFERENCES variants(variant_id, tenant_id) ON DELETE CASCADE
);

-- One JSON document per (variant, kind): {"<path>": {"hash": "...", "metadata": {...}}}
CREATE TABLE IF NOT EXISTS resource_directory (
    directory_id TEXT NOT NULL,
    variant_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    directory TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(directory)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (directory_id, tenant_id),
    UNIQUE (variant_id, tenant_id),
    FOREIGN KEY (variant_id, tenant_id) REFERENCES variants(variant_id, tenant_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS skillset_directory (
    directory_id TEXT NOT NULL,
    variant_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    directory TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(directory)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (directory_id, tenant_id),
    UNIQUE (variant_id, tenant_id),
    FOREIGN KEY (variant_id, tenant_id) REFERENCES variants(variant_id, tenant_id) ON DELETE CASCADE
);

-- Content-addressed blobs, deduplicated per tenant
CREATE TABLE IF NOT EXISTS catalog_objects (
    hash TEXT NOT NULL CHECK (length(hash) >= 16),
    hash_id TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('resource', 'skillset')),
    version TEXT NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id) ON DELETE CASCADE,
    compressed INTEGER NOT NULL DEFAULT 1,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, hash)
);

CREATE INDEX IF NOT EXISTS idx_catalog_objects_hash_id ON catalog_objects(tenant_id, hash_id);

CREATE TABLE IF NOT EXISTS views (
    view_id TEXT NOT NULL,
    label TEXT NOT NULL CHECK (length(label) BETWEEN 1 AND 128 AND label NOT GLOB '*[^A-Za-z0-9_-]*'),
    description TEXT,
    info TEXT CHECK (info IS NULL OR json_valid(info)),
    rules TEXT NOT NULL CHECK (json_valid(rules)),
    catalog_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT '',
    updated_by TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (view_id, tenant_id),
    UNIQUE (label, catalog_id, tenant_id),
    FOREIGN KEY (catalog_id, tenant_id) REFERENCES catalogs(catalog_id, tenant_id) ON DELETE CASCADE
);

-- Revocable handles on a view; deleting the view revokes its tokens
CREATE TABLE IF NOT EXISTS view_tokens (
    token_id TEXT NOT NULL,
    view_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    expire_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (token_id, tenant_id),
    FOREIGN KEY (view_id, tenant_id) REFERENCES views(view_id, tenant_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT NOT NULL,
    skillset TEXT NOT NULL,
    skill TEXT NOT NULL,
    view_id TEXT NOT NULL,
    tangent_id TEXT NOT NULL,
    status_summary TEXT NOT NULL,
    status TEXT NOT NULL CHECK (json_valid(status)),
    info TEXT NOT NULL CHECK (json_valid(info)),
    user_id TEXT NOT NULL,
    catalog_id TEXT NOT NULL,
    variant_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, session_id),
    FOREIGN KEY (catalog_id, tenant_id) REFERENCES catalogs(catalog_id, tenant_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_catalog ON sessions(tenant_id, catalog_id);

-- System-wide signing keys; the partial index admits a single active row
CREATE TABLE IF NOT EXISTS signing_keys (
    key_id TEXT PRIMARY KEY,
    public_key BLOB NOT NULL,
    private_key BLOB NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0 CHECK (is_active IN (0, 1)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_active_signing_key ON signing_keys(is_active) WHERE is_active = 1;

-- Registered remote runtimes; ids are globally unique so signed requests can name one
CREATE TABLE IF NOT EXISTS tangents (
    id TEXT PRIMARY KEY,
    info TEXT NOT NULL CHECK (json_valid(info)),
    public_key BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tangents_tenant ON tangents(tenant_id);
"#;

/// Per-connection scope variables. TEMP tables are private to the connection that
/// created them, which makes this the session-local variable store.
pub const SESSION_SCOPE_TABLE: &str = r#"
CREATE TEMP TABLE IF NOT EXISTS session_scope (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
