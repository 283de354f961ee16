//! Compute-instance retriever: structured filters over the instance
//! catalog with a fully total deterministic sort.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::RetrievalConfig;
use crate::models::RankedInstance;
use crate::ranking;

/// Conjunction of optional hard constraints. Availability is always
/// enforced; everything else only applies when set.
#[derive(Debug, Clone, Default)]
pub struct ComputeFilters {
    /// true = must have an accelerator, false = must not, None = either.
    pub gpu_needed: Option<bool>,
    pub min_vram_gb: Option<i64>,
    /// Substring match on the accelerator model name.
    pub gpu_model: Option<String>,
    pub max_price_monthly: Option<f64>,
    pub provider: Option<String>,
    /// Instance must serve this region.
    pub region: Option<String>,
    pub min_vcpu: Option<i64>,
    pub min_ram_gb: Option<f64>,
}

impl ComputeFilters {
    /// Reject nonsense values before any query executes.
    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.min_vram_gb {
            if v < 0 {
                bail!("min_vram_gb must not be negative");
            }
        }
        if let Some(p) = self.max_price_monthly {
            if p < 0.0 || !p.is_finite() {
                bail!("max_price_monthly must be a non-negative number");
            }
        }
        if let Some(v) = self.min_vcpu {
            if v < 0 {
                bail!("min_vcpu must not be negative");
            }
        }
        if let Some(r) = self.min_ram_gb {
            if r < 0.0 || !r.is_finite() {
                bail!("min_ram_gb must not be negative");
            }
        }
        for (name, value) in [
            ("gpu_model", &self.gpu_model),
            ("provider", &self.provider),
            ("region", &self.region),
        ] {
            if let Some(s) = value {
                if s.trim().is_empty() {
                    bail!("{} filter must not be blank", name);
                }
            }
        }
        Ok(())
    }
}

/// Filter and rank compute instances. An empty result set is a valid,
/// non-error outcome.
pub async fn search_compute(
    pool: &SqlitePool,
    retrieval: &RetrievalConfig,
    filters: &ComputeFilters,
) -> Result<Vec<RankedInstance>> {
    filters.validate()?;

    let mut where_clauses: Vec<String> = Vec::new();
    let mut string_params: Vec<String> = Vec::new();
    let mut float_params: Vec<f64> = Vec::new();
    let mut int_params: Vec<i64> = Vec::new();

    // Bind order below must follow clause order: strings are LIKE/equality
    // params, numbers appended after. Each clause uses exactly one kind.
    enum Param {
        Str(usize),
        Float(usize),
        Int(usize),
    }
    let mut bind_order: Vec<Param> = Vec::new();

    match filters.gpu_needed {
        Some(true) => where_clauses.push("gpu_count > 0".to_string()),
        Some(false) => where_clauses.push("(gpu_count = 0 OR gpu_count IS NULL)".to_string()),
        None => {}
    }
    if let Some(v) = filters.min_vram_gb {
        where_clauses.push("vram_gb >= ?".to_string());
        bind_order.push(Param::Int(int_params.len()));
        int_params.push(v);
    }
    if let Some(ref m) = filters.gpu_model {
        where_clauses.push("LOWER(gpu_model) LIKE LOWER(?) ESCAPE '\\'".to_string());
        bind_order.push(Param::Str(string_params.len()));
        string_params.push(format!("%{}%", escape_like(m)));
    }
    if let Some(p) = filters.max_price_monthly {
        where_clauses.push("price_monthly <= ?".to_string());
        bind_order.push(Param::Float(float_params.len()));
        float_params.push(p);
    }
    if let Some(ref p) = filters.provider {
        where_clauses.push("LOWER(provider) = LOWER(?)".to_string());
        bind_order.push(Param::Str(string_params.len()));
        string_params.push(p.clone());
    }
    if let Some(ref r) = filters.region {
        // Regions stored as a JSON string array.
        where_clauses.push("regions LIKE ? ESCAPE '\\'".to_string());
        bind_order.push(Param::Str(string_params.len()));
        string_params.push(format!("%\"{}\"%", escape_like(r)));
    }
    if let Some(v) = filters.min_vcpu {
        where_clauses.push("vcpu >= ?".to_string());
        bind_order.push(Param::Int(int_params.len()));
        int_params.push(v);
    }
    if let Some(r) = filters.min_ram_gb {
        where_clauses.push("ram_gb >= ?".to_string());
        bind_order.push(Param::Float(float_params.len()));
        float_params.push(r);
    }

    // Availability is always on.
    where_clauses.push("(available = 1 OR available IS NULL)".to_string());

    let sql = format!(
        r#"
        SELECT provider, name, instance_type,
               COALESCE(vcpu, 0) AS vcpu,
               COALESCE(ram_gb, 0.0) AS ram_gb,
               COALESCE(gpu_count, 0) AS gpu_count,
               gpu_model,
               COALESCE(vram_gb, 0) AS vram_gb,
               COALESCE(price_monthly, 0.0) AS price_monthly,
               COALESCE(price_hourly, 0.0) AS price_hourly
        FROM compute_instances
        WHERE {}
        "#,
        where_clauses.join(" AND ")
    );

    let mut query = sqlx::query(&sql);
    for param in &bind_order {
        query = match param {
            Param::Str(i) => query.bind(&string_params[*i]),
            Param::Float(i) => query.bind(float_params[*i]),
            Param::Int(i) => query.bind(int_params[*i]),
        };
    }

    let rows = query.fetch_all(pool).await?;

    let mut results: Vec<RankedInstance> = rows
        .iter()
        .map(|row| RankedInstance {
            provider: row.get("provider"),
            name: row.get("name"),
            instance_type: row.get("instance_type"),
            vcpu: row.get("vcpu"),
            ram_gb: row.get("ram_gb"),
            gpu_count: row.get("gpu_count"),
            gpu_model: row.get("gpu_model"),
            vram_gb: row.get("vram_gb"),
            price_monthly: row.get("price_monthly"),
            price_hourly: row.get("price_hourly"),
        })
        .collect();

    sort_instances(&mut results);
    results.truncate(retrieval.compute_top_k);
    Ok(results)
}

/// Escape LIKE metacharacters so user filter text always matches literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Price asc, VRAM desc, accelerator count desc, provider asc, name asc.
/// The provider/name tail makes the order total.
fn sort_instances(instances: &mut [RankedInstance]) {
    instances.sort_by(|a, b| {
        ranking::cmp_f64(a.price_monthly, b.price_monthly)
            .then_with(|| b.vram_gb.cmp(&a.vram_gb))
            .then_with(|| b.gpu_count.cmp(&a.gpu_count))
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(provider: &str, name: &str, price: f64, vram: i64, gpus: i64) -> RankedInstance {
        RankedInstance {
            provider: provider.to_string(),
            name: name.to_string(),
            instance_type: None,
            vcpu: 8,
            ram_gb: 32.0,
            gpu_count: gpus,
            gpu_model: None,
            vram_gb: vram,
            price_monthly: price,
            price_hourly: price / 730.0,
        }
    }

    #[test]
    fn test_sort_price_then_vram() {
        // $100 first; between the two $300 rows the 16GB one wins.
        let mut instances = vec![
            instance("aws", "a1", 300.0, 8, 1),
            instance("aws", "a2", 100.0, 0, 0),
            instance("aws", "a3", 300.0, 16, 1),
        ];
        sort_instances(&mut instances);
        assert_eq!(instances[0].name, "a2");
        assert_eq!(instances[1].name, "a3");
        assert_eq!(instances[2].name, "a1");
    }

    #[test]
    fn test_sort_totality_via_provider_and_name() {
        let mut instances = vec![
            instance("gcp", "n2", 50.0, 0, 0),
            instance("aws", "n2", 50.0, 0, 0),
            instance("aws", "n1", 50.0, 0, 0),
        ];
        sort_instances(&mut instances);
        assert_eq!(
            instances
                .iter()
                .map(|i| format!("{}/{}", i.provider, i.name))
                .collect::<Vec<_>>(),
            vec!["aws/n1", "aws/n2", "gcp/n2"]
        );
    }

    #[test]
    fn test_gpu_count_breaks_vram_ties() {
        let mut instances = vec![
            instance("aws", "single", 300.0, 24, 1),
            instance("aws", "dual", 300.0, 24, 2),
        ];
        sort_instances(&mut instances);
        assert_eq!(instances[0].name, "dual");
    }

    #[test]
    fn test_escape_like_metacharacters() {
        assert_eq!(escape_like("a%b_c"), "a\\%b\\_c");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("eu-west"), "eu-west");
    }

    #[test]
    fn test_filter_validation_rejects_negative_price() {
        let filters = ComputeFilters {
            max_price_monthly: Some(-10.0),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn test_filter_validation_rejects_blank_strings() {
        let filters = ComputeFilters {
            provider: Some("".to_string()),
            ..Default::default()
        };
        assert!(filters.validate().is_err());

        let filters = ComputeFilters {
            min_vram_gb: Some(-1),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }
}
