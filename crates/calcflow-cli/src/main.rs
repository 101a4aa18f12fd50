use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use calcflow_core::domain::{
    ComputationTarget, DerivedValue, ExecutionOptions, ValueRequirement, ViewCalculationConfiguration,
    ViewComputationResultModel, ViewDefinition, ViewDeltaResultModel,
};
use calcflow_core::error::FunctionError;
use calcflow_core::impls::{
    CalculationFunction, ExecutionFunction, FunctionExecutionContext, FunctionRepository, InMemoryLkvSnapshotProvider,
};
use calcflow_core::ports::{ComputationResultListener, DeltaResultListener, LiveDataInjector};
use calcflow_core::{EngineConfig, ViewProcessor, logging};

/// Run a demo view against ticking in-memory live data.
#[derive(Debug, Parser)]
#[command(name = "calcflow", version)]
struct Args {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// View definition (JSON). A built-in FX view is used when omitted.
    #[arg(long)]
    view: Option<PathBuf>,

    /// Live data ticks to publish before stopping.
    #[arg(long, default_value_t = 5)]
    ticks: u32,

    #[arg(long, default_value_t = 200)]
    tick_interval_ms: u64,
}

/// `parameters.factor` times the `Spot` input.
struct ScaleFunction;

#[async_trait]
impl CalculationFunction for ScaleFunction {
    async fn execute(&self, ctx: &FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError> {
        let factor = ctx.parameters().get("factor").and_then(|f| f.as_f64()).unwrap_or(1.0);
        Ok(vec![json!(ctx.input_f64("Spot")? * factor)])
    }
}

struct PrintingListener;

impl ComputationResultListener for PrintingListener {
    fn result_received(&self, result: &ViewComputationResultModel) {
        for name in result.calculation_configuration_names() {
            let Some(calc) = result.calculation_result(name) else {
                continue;
            };
            for value in calc.iter() {
                println!(
                    "[{}] {} {}/{} = {}",
                    result.cycle_id,
                    name,
                    value.specification.target,
                    value.specification.value_name,
                    value.value
                );
            }
        }
    }
}

impl DeltaResultListener for PrintingListener {
    fn delta_result_received(&self, delta: &ViewDeltaResultModel) {
        let changed: usize = delta
            .calculation_configuration_names()
            .filter_map(|name| delta.calculation_result(name))
            .map(|calc| calc.len())
            .sum();
        println!("[{}] {changed} value(s) changed", delta.cycle_id);
    }
}

fn demo_view() -> ViewDefinition {
    let eurusd = ComputationTarget::primitive("EURUSD");
    let gbpusd = ComputationTarget::primitive("GBPUSD");
    let spot = |target: &ComputationTarget| ValueRequirement::new("Spot", target.clone());

    ViewDefinition::new("FX").with_calc_config(
        ViewCalculationConfiguration::new("Default")
            .add_live_data(spot(&eurusd))
            .add_live_data(spot(&gbpusd))
            .add_derived(
                DerivedValue::new("scale", "Notional", eurusd.clone(), vec![spot(&eurusd)])
                    .with_parameters(json!({ "factor": 1_000_000 })),
            )
            .add_derived(DerivedValue::new(
                "spread",
                "Cross",
                gbpusd.clone(),
                vec![spot(&eurusd), spot(&gbpusd)],
            )),
    )
}

fn functions() -> Result<FunctionRepository, FunctionError> {
    let mut functions = FunctionRepository::with_live_data_sourcing();
    functions.register("scale", Arc::new(ScaleFunction))?;
    functions.register(
        "spread",
        Arc::new(ExecutionFunction::new(|ctx| {
            let legs: Vec<f64> = ctx
                .inputs
                .iter()
                .filter_map(|input| input.value.as_f64())
                .collect();
            match legs.as_slice() {
                [base, quote] if *quote != 0.0 => Ok(vec![json!(base / quote)]),
                _ => Err(FunctionError::Execution("spread needs two non-zero legs".to_string())),
            }
        })),
    )?;
    Ok(functions)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // (A) 設定とログ
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    logging::init(&config.logging);

    let view = match &args.view {
        Some(path) => serde_json::from_str::<ViewDefinition>(&std::fs::read_to_string(path)?)?,
        None => demo_view(),
    };
    let view_name = view.name.clone();

    // (B) ライブデータの初期値
    let live_data = Arc::new(InMemoryLkvSnapshotProvider::new());
    let spot = |id: &str| ValueRequirement::new("Spot", ComputationTarget::primitive(id));
    live_data.add_value(spot("EURUSD"), json!(1.08));
    live_data.add_value(spot("GBPUSD"), json!(1.27));

    // (C) ViewProcessor を組み立てて起動
    let processor = ViewProcessor::builder()
        .config(config)
        .live_data_provider(live_data.clone())
        .local_node(functions()?)
        .view_definition(view)
        .build()?;
    processor.start();

    let client = processor.create_view_client();
    let listener = Arc::new(PrintingListener);
    client.set_result_listener(Some(listener.clone()))?;
    client.set_delta_result_listener(Some(listener))?;
    client.attach_to_view_process(&view_name, ExecutionOptions::real_time())?;

    // (D) 値を動かして再計算させる（Ctrl-C で中断）
    let ticking = async {
        for tick in 1..=args.ticks {
            sleep(Duration::from_millis(args.tick_interval_ms)).await;
            let eurusd = 1.08 + f64::from(tick) * 0.001;
            info!(tick, eurusd, "publishing tick");
            live_data.add_value(spot("EURUSD"), json!(eurusd));
        }
        sleep(Duration::from_millis(args.tick_interval_ms)).await;
    };
    tokio::select! {
        _ = ticking => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    // (E) 後片付け
    client.shutdown();
    processor.stop().await;
    println!("dispatcher: {:?}", processor.dispatcher_stats());
    Ok(())
}
