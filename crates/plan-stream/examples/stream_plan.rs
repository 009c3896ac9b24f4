use plan_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    plan_stream::observability::init_observability();

    let source = HttpEventSource::new(ClientConfig::from_env()?)?;
    let registry = SessionRegistry::new();
    let response_id = plan_stream::new_response_id();

    let mut aggregation = start_response(
        &registry,
        &source,
        &response_id,
        StreamRequest::new("Teach me about the Second World War")
            .skill("learning_plan", 0.9)
            .param("topic", serde_json::json!("WWII")),
    )
    .await?;

    let mut printed = 0;
    while let Some(state) = aggregation.next_snapshot().await {
        print!("{}", &state.content()[printed..]);
        printed = state.content().len();
        if let Some(order) = state.current_step()
            && let Some(step) = state.step(order)
        {
            eprintln!("[step {order} {}: {:?}] {}", step.name, step.status, state.status());
        }
    }
    println!();

    let state = registry.get(&response_id)?;
    match state.outcome() {
        Outcome::Completed => {
            for output in state.step_outputs() {
                println!("step {} -> {}", output.order, output.output_type);
            }
            if let Some(artifact) = state.artifact() {
                println!("artifact {} ({})", artifact.artifact_id, artifact.artifact_type);
            }
        }
        Outcome::Failed => eprintln!("response failed: {}", state.error().unwrap_or_default()),
        Outcome::Running => {}
    }
    registry.dispose(&response_id);
    Ok(())
}
