/// Runs a function with all CR_ environment variables unset
pub(crate) fn with_no_cr_vars<F: FnOnce() -> R, R>(f: F) -> R {
    let cr_vars = std::env::vars()
        .map(|(k, _v)| k)
        .filter(|k| k.starts_with("CR_"))
        .collect::<Vec<_>>();

    temp_env::with_vars_unset(&cr_vars, f)
}
