use bosd_operator::Env;

#[derive(Clone)]
pub struct AppState {
    pub env: Env,
}
