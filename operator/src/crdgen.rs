use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaPropsOrArray;
use kube::CustomResourceExt;

fn main() {
    let mut crd = controller::CustomResourceStateMetrics::crd();
    if let Some(ref mut schema) = crd.spec.versions[0].schema {
        if let Some(ref mut api) = schema.open_api_v3_schema {
            if let Some(ref mut props) = api.properties {
                props.entry("spec".into()).and_modify(|spec| {
                    if let Some(ref mut props) = spec.properties {
                        props.entry("resources".into()).and_modify(|resources| {
                            if let Some(JSONSchemaPropsOrArray::Schema(ref mut items)) = resources.items {
                                items.x_kubernetes_preserve_unknown_fields = Some(true);
                                items.additional_properties = None;
                            }
                        });
                    }
                });
            }
        }
    }
    print!("{}", serde_yaml::to_string(&crd).unwrap());
}
