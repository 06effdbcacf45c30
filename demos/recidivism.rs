//! model averaging on recidivism-style data.
//!
//! pass a csv path (week, arrest, then covariates) to use real data; otherwise
//! a synthetic year of weekly follow-up is generated. `RUST_LOG=debug` shows
//! per-model scores.

use cox_bma::{
    BmaEngine, CoxPhFitter, Dataset, FitBudget, HazardFitter, ModelSpace, PriorSpecification,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic_recidivism(n_samples: usize) -> Result<Dataset, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(1980);
    let names = ["week", "arrest", "fin", "age", "race", "wexp", "mar", "paro", "prio"];
    let effects = [-0.38, -0.057, 0.31, -0.15, -0.43, -0.08, 0.09];

    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n_samples); names.len()];
    for _ in 0..n_samples {
        let row = [
            rng.gen_bool(0.5) as u8 as f64,
            rng.gen_range(17..45) as f64,
            rng.gen_bool(0.88) as u8 as f64,
            rng.gen_bool(0.57) as u8 as f64,
            rng.gen_bool(0.12) as u8 as f64,
            rng.gen_bool(0.62) as u8 as f64,
            (rng.r#gen::<f64>().powi(2) * 18.0).floor(),
        ];
        let linear_pred: f64 = row.iter().zip(&effects).map(|(x, b)| x * b).sum();
        let time = -rng.r#gen::<f64>().ln() / (0.02 * linear_pred.exp());

        columns[0].push(time.ceil().min(52.0));
        columns[1].push(if time < 52.0 { 1.0 } else { 0.0 });
        for (j, value) in row.iter().enumerate() {
            columns[j + 2].push(*value);
        }
    }

    Ok(Dataset::from_columns(names.into_iter().zip(columns))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Cox Model Averaging - Recidivism Example");
    println!("========================================\n");

    let data = match std::env::args().nth(1) {
        Some(path) => Dataset::from_csv_path(path)?,
        None => synthetic_recidivism(432)?,
    };
    let covariates = data.covariate_names("week", "arrest");

    println!("Dataset Information:");
    println!("  - Number of records: {}", data.n_rows());
    println!("  - Covariates: {}", covariates.join(", "));
    println!();

    // Example 0: the single full model every candidate is scored against
    println!("Full Model");
    println!("----------");

    let view = data.survival_view("week", "arrest", &covariates)?;
    let full = CoxPhFitter::new().fit(&view, &FitBudget::unlimited())?;
    full.print();
    println!("\n");

    // Example 1: every subset, uninformative prior
    println!("Example 1: Exhaustive Model Space");
    println!("---------------------------------");

    let engine = BmaEngine::new();
    let result = engine.fit(&data, "week", "arrest", None, None)?;
    result.print(10);
    println!("\n");

    // Example 2: a handful of hand-picked models w/ an informative prior
    println!("Example 2: Curated Models, Informative Prior");
    println!("--------------------------------------------");

    if ["fin", "age", "race", "mar", "prio"].iter().all(|c| covariates.iter().any(|n| n == c)) {
        let prior = PriorSpecification::from_pairs(
            covariates.iter().map(|name| (name.clone(), if name == "prio" { 0.7 } else { 0.5 })),
        )?;
        let space = ModelSpace::curated(vec![
            vec!["fin", "prio"],
            vec!["race", "mar"],
            vec!["prio", "race"],
            vec!["prio", "race", "mar"],
            vec!["prio", "age", "mar"],
            vec!["race", "age"],
        ]);

        let curated = engine.fit(&data, "week", "arrest", Some(&prior), Some(&space))?;
        curated.print(6);

        if let Some(best) = curated.best_model() {
            println!("\nbest model: {} (posterior {:.4})", best.subset, best.posterior);
        }
    } else {
        println!("skipped: dataset lacks the recidivism covariates");
    }

    Ok(())
}
