use kube::runtime::events::Reporter;

pub static CONTROLLER_NAME: &str = "controller.ksm.jtyr.io";

fn get_prog_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()?
        .to_str()?
        .to_owned()
        .into()
}

pub fn get_client_name() -> String {
    match get_prog_name() {
        Some(p) if p == "operator" => CONTROLLER_NAME.to_string(),
        _ => "ksm.jtyr.io".to_string(),
    }
}

pub fn get_short_name() -> String {
    let long = get_client_name();
    let lst = long.split('.').collect::<Vec<&str>>();
    if lst.len() > 3 {
        format!("crsm-{}", lst[0])
    } else {
        "crsm".to_string()
    }
}

pub fn get_reporter() -> Reporter {
    Reporter {
        controller: get_short_name(),
        instance: Some(std::env::var("POD_NAME").unwrap_or_else(|_| "unknown".to_string())),
    }
}
