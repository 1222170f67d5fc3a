use std::collections::HashMap;

use custom_ops::{
    infer_dtype_fn, infer_shape_fn, kernel_fn, AdapterKind, Attribute, DataType,
    DuplicatePolicy, HostConfig, OpError, OpMetaInfoBuilder, OpMetaInfoMap, OpRole,
    OperatorTable, Shape, Tensor,
};
use test_log::test;

fn scale(x: Tensor, factor: f32) -> Vec<Tensor> {
    let value = x.downcast_ref::<f32>().copied().unwrap_or_default();
    vec![Tensor::new(value * factor)]
}

fn scale_grad(out_grad: Tensor, factor: f32) -> Vec<Tensor> {
    scale(out_grad, factor)
}

fn same_shape(x: Shape) -> Vec<Shape> {
    vec![x]
}

fn same_dtype(x: DataType) -> Vec<DataType> {
    vec![x]
}

fn scale_registry() -> OpMetaInfoMap {
    let mut registry = OpMetaInfoMap::new();
    OpMetaInfoBuilder::new(&mut registry, "scale")
        .inputs(["X"])
        .outputs(["Out"])
        .attrs(["factor:float"])
        .set_kernel_fn(kernel_fn(scale).unwrap())
        .set_infer_shape_fn(infer_shape_fn(same_shape).unwrap())
        .set_infer_dtype_fn(infer_dtype_fn(same_dtype).unwrap())
        .set_backward_op("scale_grad")
        .inputs(["Out@GRAD"])
        .outputs(["X@GRAD"])
        .attrs(["factor:float"])
        .set_kernel_fn(kernel_fn(scale_grad).unwrap());
    registry
}

fn factor(value: f32) -> HashMap<String, Attribute> {
    HashMap::from([("factor".to_string(), Attribute::Float32(value))])
}

#[test]
fn merge_links_forward_and_backward_ops() {
    let mut table = OperatorTable::default();
    let merged = table.merge(&scale_registry().snapshot()).unwrap();
    assert_eq!(merged, 2);
    assert_eq!(table.names(), ["scale", "scale_grad"]);

    let forward = table.get("scale").unwrap();
    assert_eq!(forward.backward_ops(), ["scale_grad"]);
    assert_eq!(forward.forward_op(), None);
    assert_eq!(forward.attrs()[0].name, "factor");

    let backward = table.get("scale_grad").unwrap();
    assert_eq!(
        backward.role(),
        &OpRole::Backward {
            forward: "scale".to_string()
        }
    );
    assert!(backward.backward_ops().is_empty());
}

#[test]
fn run_kernel_orders_named_attributes() {
    let mut table = OperatorTable::default();
    table.merge(&scale_registry().snapshot()).unwrap();

    let out = table
        .run_kernel("scale", &[Tensor::new(3.0f32)], &factor(2.0))
        .unwrap();
    assert_eq!(out[0].downcast_ref::<f32>(), Some(&6.0));

    let grad = table
        .run_kernel("scale_grad", &[Tensor::new(1.0f32)], &factor(4.0))
        .unwrap();
    assert_eq!(grad[0].downcast_ref::<f32>(), Some(&4.0));

    let err = table
        .run_kernel("scale", &[Tensor::new(3.0f32)], &HashMap::new())
        .unwrap_err();
    assert!(matches!(err, OpError::MissingAttr { ref attr, .. } if attr == "factor"));
}

#[test]
fn inference_goes_through_the_table() {
    let mut table = OperatorTable::default();
    table.merge(&scale_registry().snapshot()).unwrap();

    assert_eq!(
        table.infer_shapes("scale", &[vec![4, 5]]).unwrap(),
        vec![vec![4, 5]]
    );
    assert_eq!(
        table.infer_dtypes("scale", &[DataType::Float16]).unwrap(),
        vec![DataType::Float16]
    );
    assert!(matches!(
        table.infer_shapes("scale_grad", &[vec![4, 5]]),
        Err(OpError::UnregisteredAdapter {
            adapter: AdapterKind::InferShape,
            ..
        })
    ));
    assert!(matches!(
        table.infer_shapes("softmax", &[]),
        Err(OpError::UnknownOperator(ref name)) if name == "softmax"
    ));
}

#[test]
fn duplicate_policies() {
    let snapshot = scale_registry().snapshot();

    let mut strict = OperatorTable::default();
    strict.merge(&snapshot).unwrap();
    let err = strict.merge(&snapshot).unwrap_err();
    assert!(matches!(err, OpError::DuplicateOperator(ref name) if name == "scale"));
    assert_eq!(strict.len(), 2);

    let mut lenient = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Skip,
        ..HostConfig::default()
    });
    lenient.merge(&snapshot).unwrap();
    assert_eq!(lenient.merge(&snapshot).unwrap(), 0);

    let mut replacing = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Replace,
        ..HostConfig::default()
    });
    replacing.merge(&snapshot).unwrap();
    assert_eq!(replacing.merge(&snapshot).unwrap(), 2);
    assert_eq!(replacing.len(), 2);
}

fn identity(x: Tensor) -> Vec<Tensor> {
    vec![x]
}

fn nothing(_x: Tensor) -> Vec<Tensor> {
    Vec::new()
}

fn add_registered_twice() -> OpMetaInfoMap {
    let mut registry = OpMetaInfoMap::new();
    OpMetaInfoBuilder::new(&mut registry, "add").set_kernel_fn(kernel_fn(identity).unwrap());
    OpMetaInfoBuilder::new(&mut registry, "add").set_kernel_fn(kernel_fn(nothing).unwrap());
    registry
}

#[test]
fn repeated_name_in_one_group_follows_the_duplicate_policy() {
    let snapshot = add_registered_twice().snapshot();
    assert_eq!(snapshot["add"].len(), 2);
    let no_attrs = HashMap::new();

    let mut strict = OperatorTable::default();
    let err = strict.merge(&snapshot).unwrap_err();
    assert!(matches!(err, OpError::DuplicateOperator(ref name) if name == "add"));
    assert!(strict.is_empty());

    let mut skipping = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Skip,
        ..HostConfig::default()
    });
    assert_eq!(skipping.merge(&snapshot).unwrap(), 1);
    let add = skipping.get("add").unwrap();
    assert_eq!(add.role(), &OpRole::Forward { backward: Vec::new() });
    let out = skipping
        .run_kernel("add", &[Tensor::new(1i32)], &no_attrs)
        .unwrap();
    assert_eq!(out.len(), 1);

    let mut replacing = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Replace,
        ..HostConfig::default()
    });
    assert_eq!(replacing.merge(&snapshot).unwrap(), 1);
    let add = replacing.get("add").unwrap();
    assert_eq!(add.forward_op(), None);
    assert!(add.backward_ops().is_empty());
    let out = replacing
        .run_kernel("add", &[Tensor::new(1i32)], &no_attrs)
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn replacing_a_forward_op_drops_its_old_backward_ops() {
    let mut table = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Replace,
        ..HostConfig::default()
    });
    table.merge(&scale_registry().snapshot()).unwrap();
    assert!(table.contains("scale_grad"));

    let mut registry = OpMetaInfoMap::new();
    OpMetaInfoBuilder::new(&mut registry, "scale")
        .inputs(["X"])
        .outputs(["Out"])
        .attrs(["factor:float"])
        .set_kernel_fn(kernel_fn(scale).unwrap());
    assert_eq!(table.merge(&registry.snapshot()).unwrap(), 1);

    assert_eq!(table.names(), ["scale"]);
    assert!(table.get("scale").unwrap().backward_ops().is_empty());
}

#[test]
fn replacing_a_backward_op_unlinks_it_from_its_old_forward_op() {
    let mut table = OperatorTable::new(HostConfig {
        on_duplicate: DuplicatePolicy::Replace,
        ..HostConfig::default()
    });
    table.merge(&scale_registry().snapshot()).unwrap();

    let mut registry = OpMetaInfoMap::new();
    OpMetaInfoBuilder::new(&mut registry, "shift")
        .inputs(["X"])
        .outputs(["Out"])
        .set_backward_op("scale_grad")
        .inputs(["Out@GRAD"])
        .outputs(["X@GRAD"]);
    assert_eq!(table.merge(&registry.snapshot()).unwrap(), 2);

    assert!(table.get("scale").unwrap().backward_ops().is_empty());
    assert_eq!(table.get("shift").unwrap().backward_ops(), ["scale_grad"]);
    assert_eq!(table.get("scale_grad").unwrap().forward_op(), Some("shift"));
}

#[test]
fn failed_merge_leaves_the_table_untouched() {
    let mut registry = scale_registry();
    OpMetaInfoBuilder::new(&mut registry, "zz_broken")
        .inputs(["X"])
        .attrs(["mode:double"]);

    let mut table = OperatorTable::default();
    let err = table.merge(&registry.snapshot()).unwrap_err();
    assert!(matches!(err, OpError::InvalidAttr { ref decl, .. } if decl == "mode:double"));
    assert!(table.is_empty());
}

#[test]
fn grad_name_checks_are_opt_in() {
    let mut registry = OpMetaInfoMap::new();
    OpMetaInfoBuilder::new(&mut registry, "scale")
        .inputs(["X"])
        .outputs(["Out"])
        .set_backward_op("scale_grad")
        .inputs(["dOut"])
        .outputs(["dX"]);
    let snapshot = registry.snapshot();

    let mut lenient = OperatorTable::default();
    assert_eq!(lenient.merge(&snapshot).unwrap(), 2);

    let mut strict = OperatorTable::new(HostConfig {
        check_grad_names: true,
        ..HostConfig::default()
    });
    let err = strict.merge(&snapshot).unwrap_err();
    assert!(matches!(
        err,
        OpError::InvalidGradOp { ref op, ref var, .. } if op == "scale_grad" && var == "dOut"
    ));

    let mut checked = OperatorTable::new(HostConfig {
        check_grad_names: true,
        ..HostConfig::default()
    });
    assert_eq!(checked.merge(&scale_registry().snapshot()).unwrap(), 2);
}

#[test]
fn empty_slots_are_skipped() {
    let mut registry = OpMetaInfoMap::new();
    registry.get_or_create_slot("placeholder");
    let mut table = OperatorTable::default();
    assert_eq!(table.merge(&registry.snapshot()).unwrap(), 0);
    assert!(!table.contains("placeholder"));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: HostConfig = serde_json::from_str(r#"{"on_duplicate": "replace"}"#).unwrap();
    assert_eq!(config.on_duplicate, DuplicatePolicy::Replace);
    assert!(!config.check_grad_names);

    let config: HostConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, HostConfig::default());
    assert!(serde_json::from_str::<HostConfig>(r#"{"on_duplicate": "merge"}"#).is_err());
}

#[test]
fn config_reads_environment_overrides() {
    std::env::set_var("CUSTOM_OPS_ON_DUPLICATE", "skip");
    std::env::set_var("CUSTOM_OPS_CHECK_GRAD_NAMES", "yes");
    let config = HostConfig::from_env().unwrap();
    assert_eq!(config.on_duplicate, DuplicatePolicy::Skip);
    assert!(config.check_grad_names);

    std::env::set_var("CUSTOM_OPS_ON_DUPLICATE", "sometimes");
    assert!(matches!(
        HostConfig::from_env(),
        Err(OpError::InvalidConfig { ref value, .. }) if value == "sometimes"
    ));

    std::env::remove_var("CUSTOM_OPS_ON_DUPLICATE");
    std::env::remove_var("CUSTOM_OPS_CHECK_GRAD_NAMES");
    assert_eq!(HostConfig::from_env().unwrap(), HostConfig::default());
}
