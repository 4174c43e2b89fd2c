use anyhow::Result;
use pretty_assertions::assert_eq;
use wasmer::*;
use wasmer_persist::{
    prepare, GlobalValue, InclusionPolicy, InstanceSnapshot, PersistentInstance, DEFAULT_SYMBOL,
};

fn instantiate(store: &mut Store, wasm: &[u8], imports: &Imports) -> Result<Instance> {
    let module = Module::new(&*store, wasm)?;
    Ok(Instance::new(store, &module, imports)?)
}

fn prepared(source: &str, policy: &InclusionPolicy, symbol: &str) -> Result<Vec<u8>> {
    let wasm = wat::parse_str(source)?;
    let wasm = prepare(&wasm, policy, symbol)?;
    Ok(wasm)
}

fn snapshot(globals: Vec<Option<GlobalValue>>) -> InstanceSnapshot {
    InstanceSnapshot {
        globals,
        ..InstanceSnapshot::new(DEFAULT_SYMBOL)
    }
}

const SINGLE_TABLE: &str = r#"(module
    (table 1 1 funcref)
    (elem (i32.const 0) $e)
    (func $e (export "e")))"#;

const SINGLE_MEMORY: &str = r#"(module
    (memory (export "mem") 1)
    (data (i32.const 0) "\01\00\00\00\ff\ff\ff\ff"))"#;

const DOUBLE_GLOBALS: &str = r#"(module
    (global (mut i32) (i32.const -2))
    (global (mut i64) (i64.const -2)))"#;

#[test_log::test]
fn empty() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared("(module)", &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let mut instance = PersistentInstance::new(instance, DEFAULT_SYMBOL);

    let json = instance.hibernate(&mut store)?;
    instance.resume(&mut store, &json)?;
    assert_eq!(json, InstanceSnapshot::new("_"));
    assert_eq!(instance.instance().exports.len(), 0);
    Ok(())
}

#[test]
fn custom_sections() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        r#"(module (@custom "a" "1") (@custom "b" (after last) "2"))"#,
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, InstanceSnapshot::new("_"));
    assert_eq!(instance.exports.len(), 0);
    Ok(())
}

#[test]
fn single_type_section() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        "(module (type (func (param i64) (result f32))))",
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, InstanceSnapshot::new("_"));
    assert_eq!(instance.exports.len(), 0);
    Ok(())
}

#[test]
fn single_import_section() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        r#"(module (import "foo" "bar" (func)))"#,
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let imports = imports! {
        "foo" => {
            "bar" => Function::new_typed(&mut store, || {}),
        },
    };
    let instance = instantiate(&mut store, &wasm, &imports)?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, InstanceSnapshot::new("_"));
    assert_eq!(instance.exports.len(), 0);
    Ok(())
}

#[test]
fn single_function() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        r#"(module (func (export "e")))"#,
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, InstanceSnapshot::new("_"));
    assert_eq!(instance.exports.len(), 2);
    instance.exports.get_function("_func_0")?;
    Ok(())
}

#[test]
fn single_table() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(SINGLE_TABLE, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(
        json,
        InstanceSnapshot {
            table: vec![Some(0)],
            ..InstanceSnapshot::new("_")
        }
    );
    assert_eq!(instance.exports.len(), 3);
    Ok(())
}

#[test]
fn single_table_with_foreign_function() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(SINGLE_TABLE, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let other = instantiate(&mut store, &wasm, &imports! {})?;

    let foreign = other.exports.get_function("e")?.clone();
    instance
        .exports
        .get_table("_table")?
        .set(&mut store, 0, Value::FuncRef(Some(foreign)))?;

    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(
        json,
        InstanceSnapshot {
            table: vec![None],
            ..InstanceSnapshot::new("_")
        }
    );
    assert_eq!(instance.exports.len(), 3);
    Ok(())
}

#[test]
fn single_table_resume() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(SINGLE_TABLE, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;

    let fresh = instantiate(&mut store, &wasm, &imports! {})?;
    wasmer_persist::resume(&mut store, &fresh, &json)?;
    let json2 = wasmer_persist::hibernate(&mut store, &fresh, DEFAULT_SYMBOL)?;
    assert_eq!(json, json2);
    Ok(())
}

#[test]
fn single_memory() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(SINGLE_MEMORY, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;

    let memory = json.memory.expect("memory should be captured");
    assert_eq!(memory.len(), 16384);
    assert_eq!(&memory[..3], &[1, u32::MAX, 0]);
    assert_eq!(instance.exports.len(), 2);
    Ok(())
}

#[test]
fn skipping_memory() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        SINGLE_MEMORY,
        &InclusionPolicy::new().with_memory(false),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json.memory, None);
    assert_eq!(instance.exports.len(), 1);
    Ok(())
}

#[test]
fn resuming_memory() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(SINGLE_MEMORY, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    instance
        .exports
        .get_memory("mem")?
        .view(&store)
        .write(100, &[0xde, 0xad, 0xbe, 0xef])?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;

    let fresh = instantiate(&mut store, &wasm, &imports! {})?;
    wasmer_persist::resume(&mut store, &fresh, &json)?;
    let json2 = wasmer_persist::hibernate(&mut store, &fresh, DEFAULT_SYMBOL)?;
    assert_eq!(json, json2);

    let mut word = [0; 4];
    fresh
        .exports
        .get_memory("mem")?
        .view(&store)
        .read(100, &mut word)?;
    assert_eq!(word, [0xde, 0xad, 0xbe, 0xef]);
    Ok(())
}

#[test]
fn single_i32_global() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        "(module (global (mut i32) (i32.const -2)))",
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let mut json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, snapshot(vec![Some(GlobalValue::I32(-2))]));
    assert_eq!(instance.exports.len(), 2);

    json.globals[0] = Some(GlobalValue::I32(8));
    let fresh = instantiate(&mut store, &wasm, &imports! {})?;
    wasmer_persist::resume(&mut store, &fresh, &json)?;
    let json2 = wasmer_persist::hibernate(&mut store, &fresh, DEFAULT_SYMBOL)?;
    assert_eq!(json2, snapshot(vec![Some(GlobalValue::I32(8))]));
    Ok(())
}

#[test]
fn single_i64_global() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        "(module (global (mut i64) (i64.const -2)))",
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, snapshot(vec![Some(GlobalValue::I64([-1, -2]))]));
    assert_eq!(instance.exports.len(), 3);
    Ok(())
}

#[test]
fn resuming_i64_global() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        "(module (global (mut i64) (i64.const -2)))",
        &InclusionPolicy::default(),
        DEFAULT_SYMBOL,
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = snapshot(vec![Some(GlobalValue::I64([99, 97]))]);
    wasmer_persist::resume(&mut store, &instance, &json)?;
    let json2 = wasmer_persist::hibernate(&mut store, &instance, DEFAULT_SYMBOL)?;
    assert_eq!(json, json2);
    Ok(())
}

#[test]
fn skipping_the_second_global() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        DOUBLE_GLOBALS,
        &InclusionPolicy::new().with_globals([true, false]),
        "_@",
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, "_@")?;
    assert_eq!(
        json,
        InstanceSnapshot {
            globals: vec![Some(GlobalValue::I32(-2))],
            ..InstanceSnapshot::new("_@")
        }
    );
    assert_eq!(instance.exports.len(), 2);
    Ok(())
}

#[test]
fn skipping_the_first_global() -> Result<()> {
    let mut store = Store::default();
    let wasm = prepared(
        DOUBLE_GLOBALS,
        &InclusionPolicy::new().with_globals([false]),
        "_@",
    )?;
    let instance = instantiate(&mut store, &wasm, &imports! {})?;
    let json = wasmer_persist::hibernate(&mut store, &instance, "_@")?;
    assert_eq!(
        json,
        InstanceSnapshot {
            globals: vec![None, Some(GlobalValue::I64([-1, -2]))],
            ..InstanceSnapshot::new("_@")
        }
    );
    assert_eq!(instance.exports.len(), 3);
    Ok(())
}
