use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;

use income_predictor::ArtifactPaths;
use income_predictor::model::{GbdtModel, ModelSchema, Tree};

const FEATURES: [&str; 7] = [
    "first_salary_income",
    "age",
    "is_male",
    "adminarea_te",
    "city_smart_name_te",
    "num_unique_regions",
    "period_year",
];

const REGIONS: [&str; 4] = ["Москва", "Тверская область", "Псковская область", "Татарстан"];
const CITIES: [&str; 4] = ["Москва", "Тверь", "Псков", "Казань"];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_f64() * n as f64) as usize % n
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Depth-1 tree: `x[feature] < threshold` → `left`, else `right`.
fn stump(feature: u32, threshold: f64, left: f64, right: f64) -> Tree {
    Tree {
        split_indices: vec![feature, 0, 0],
        thresholds: vec![threshold, 0.0, 0.0],
        children_left: vec![1, 0, 0],
        children_right: vec![2, 0, 0],
        default_left: vec![true, false, false],
        leaf_values: vec![0.0, left, right],
    }
}

fn write_artifacts(dir: &Path) -> Result<()> {
    let paths = ArtifactPaths::in_dir(dir);

    let model = ModelSchema::Gbdt(GbdtModel {
        feature_names: Some(FEATURES.iter().map(|s| s.to_string()).collect()),
        base_score: 60000.0,
        trees: vec![
            stump(0, 50000.0, -15000.0, 25000.0),
            stump(1, 25.0, -8000.0, 3000.0),
            stump(2, 0.5, -2000.0, 2000.0),
            stump(3, 60000.0, -5000.0, 9000.0),
            stump(4, 55000.0, -3000.0, 6000.0),
            stump(5, 2.0, 0.0, 1500.0),
            stump(6, 2022.0, -4000.0, 1000.0),
        ],
    });
    fs::write(&paths.model, serde_json::to_string_pretty(&model)?)
        .context("writing model")?;

    let stats = json!({
        "adminarea": {
            "mapping": {"Москва": 82000.0, "Тверская область": 51000.0, "Unknown": 47000.0},
            "global_mean": 55000.0
        },
        "city_smart_name": {
            "stats": {"Москва": 85000.0, "Казань": 58000.0},
            "global_mean": 54000.0
        }
    });
    fs::write(&paths.target_encoding, serde_json::to_string_pretty(&stats)?)
        .context("writing target-encoding statistics")?;

    fs::write(&paths.columns_to_drop, serde_json::to_string_pretty(&json!(["leaky_income"]))?)
        .context("writing drop list")?;

    let metadata = json!({
        "features": FEATURES,
        "median_fill": {"first_salary_income": 42000.0, "age": 37.0},
        "te_columns": ["adminarea", "city_smart_name", "dp_address_unique_regions"]
    });
    fs::write(&paths.metadata, serde_json::to_string_pretty(&metadata)?)
        .context("writing metadata")?;
    Ok(())
}

struct SampleRows {
    id: Vec<i64>,
    salary: Vec<Option<f64>>,
    age: Vec<Option<i64>>,
    gender: Vec<Option<String>>,
    adminarea: Vec<Option<String>>,
    city: Vec<Option<String>>,
    regions: Vec<Option<String>>,
    period: Vec<Option<String>>,
    dt: Vec<String>,
    leaky: Vec<f64>,
}

fn generate_rows(n: usize, rng: &mut SimpleRng) -> SampleRows {
    let mut rows = SampleRows {
        id: Vec::new(),
        salary: Vec::new(),
        age: Vec::new(),
        gender: Vec::new(),
        adminarea: Vec::new(),
        city: Vec::new(),
        regions: Vec::new(),
        period: Vec::new(),
        dt: Vec::new(),
        leaky: Vec::new(),
    };
    for i in 0..n {
        let salary = 20000.0 + (rng.next_f64() * 120000.0).round();
        rows.id.push(1000 + i as i64);
        rows.salary.push((!rng.chance(0.1)).then_some(salary));
        rows.age.push((!rng.chance(0.05)).then(|| 18 + rng.below(50) as i64));
        let gender = if rng.chance(0.5) { "Мужской" } else { "Женский" };
        rows.gender.push(Some(gender.to_string()));
        rows.adminarea
            .push((!rng.chance(0.15)).then(|| REGIONS[rng.below(REGIONS.len())].to_string()));
        rows.city.push(Some(CITIES[rng.below(CITIES.len())].to_string()));
        let k = 1 + rng.below(3);
        let regions: Vec<&str> = (0..k).map(|_| REGIONS[rng.below(REGIONS.len())]).collect();
        rows.regions
            .push((!rng.chance(0.2)).then(|| regions.join(",")));
        let period = if rng.chance(0.1) {
            "unknown".to_string()
        } else {
            format!("{}-{:02}-{:02}", 2019 + rng.below(6), 1 + rng.below(12), 1 + rng.below(28))
        };
        rows.period.push(Some(period));
        rows.dt.push("2024-06-30".to_string());
        rows.leaky.push(salary * 1.1);
    }
    rows
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(T::to_string).unwrap_or_default()
}

fn write_csv(path: &Path, rows: &SampleRows) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .context("creating sample CSV")?;
    writer.write_record([
        "id",
        "first_salary_income",
        "age",
        "gender",
        "adminarea",
        "city_smart_name",
        "dp_address_unique_regions",
        "period_last_act_ad",
        "dt",
        "leaky_income",
    ])?;
    for i in 0..rows.id.len() {
        writer.write_record([
            rows.id[i].to_string(),
            opt(&rows.salary[i]).replace('.', ","),
            opt(&rows.age[i]),
            opt(&rows.gender[i]),
            opt(&rows.adminarea[i]),
            opt(&rows.city[i]),
            opt(&rows.regions[i]),
            opt(&rows.period[i]),
            rows.dt[i].clone(),
            rows.leaky[i].to_string().replace('.', ","),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &Path, rows: &SampleRows) -> Result<()> {
    let text = |v: &[Option<String>]| -> ArrayRef {
        Arc::new(StringArray::from(v.iter().map(|s| s.as_deref()).collect::<Vec<_>>()))
    };

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("first_salary_income", DataType::Float64, true),
        Field::new("age", DataType::Int64, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("adminarea", DataType::Utf8, true),
        Field::new("city_smart_name", DataType::Utf8, true),
        Field::new("dp_address_unique_regions", DataType::Utf8, true),
        Field::new("period_last_act_ad", DataType::Utf8, true),
        Field::new("dt", DataType::Utf8, false),
        Field::new("leaky_income", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(rows.id.clone())),
            Arc::new(Float64Array::from(rows.salary.clone())),
            Arc::new(Int64Array::from(rows.age.clone())),
            text(&rows.gender),
            text(&rows.adminarea),
            text(&rows.city),
            text(&rows.regions),
            text(&rows.period),
            Arc::new(StringArray::from(rows.dt.clone())),
            Arc::new(Float64Array::from(rows.leaky.clone())),
        ],
    )
    .context("building record batch")?;

    let file = fs::File::create(path).context("creating sample parquet")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "sample".to_string());
    let out_dir = Path::new(&out_dir);
    fs::create_dir_all(out_dir).context("creating output directory")?;

    write_artifacts(out_dir)?;

    let mut rng = SimpleRng::new(42);
    let rows = generate_rows(200, &mut rng);
    write_csv(&out_dir.join("sample_input.csv"), &rows)?;
    write_parquet(&out_dir.join("sample_input.parquet"), &rows)?;

    println!(
        "Wrote artifacts and {} sample records to {}",
        rows.id.len(),
        out_dir.display()
    );
    Ok(())
}
