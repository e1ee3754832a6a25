//! # 命令分发集成测试
//!
//! 测试命令文本 → 解析 → 处理器 / 呈现层兜底 的执行链路。

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use yarn_runtime::{
    BlockingCommandFn, CapabilityError, Callable, CommandFn, CommandProvider, Continuation,
    DialogueRunner, EventDispatcher, HostError, HostObject, Instruction, MethodInfo, Node,
    PresentationEvent, Program, RunnerConfig, ScriptObject, Variant, VariantType,
};

type Log = Rc<RefCell<Vec<String>>>;

fn program(commands: &[&str]) -> Program {
    let node = commands
        .iter()
        .fold(Node::new(), |node, text| node.with(Instruction::command(*text)));
    Program::new("commands").with_node("Start", node.with(Instruction::line("line:end")))
}

fn runner(commands: &[&str]) -> (DialogueRunner, EventDispatcher) {
    let dispatcher = EventDispatcher::new();
    let mut runner = DialogueRunner::native(dispatcher.clone(), RunnerConfig::default());
    runner.load(vec![program(commands)]).unwrap();
    (runner, dispatcher)
}

fn recorder(log: &Log, tag: &'static str) -> impl Fn(&[String]) + 'static {
    let log = Rc::clone(log);
    move |args: &[String]| log.borrow_mut().push(format!("{tag} {}", args.join(" ")))
}

#[test]
fn test_scoped_fallback_dispatch() {
    let log = Log::default();
    let (mut runner, dispatcher) = runner(&["item give sword"]);
    assert!(runner.register_command("give::item", recorder(&log, "h1")));

    runner.start().unwrap();
    assert_eq!(*log.borrow(), vec!["h1 sword"]);
    assert!(
        dispatcher
            .take_events()
            .iter()
            .all(|e| !matches!(e, PresentationEvent::UnhandledCommand { .. }))
    );
}

#[test]
fn test_duplicate_registration_dispatches_first() {
    let log = Log::default();
    let (mut runner, _) = runner(&["foo bar"]);
    assert!(runner.register_command("foo", recorder(&log, "h1")));
    assert!(!runner.register_command("foo", recorder(&log, "h2")));

    runner.start().unwrap();
    assert_eq!(*log.borrow(), vec!["h1 bar"]);
}

#[test]
fn test_unhandled_command_goes_to_presenter() {
    let (mut runner, dispatcher) = runner(&["item give", "   "]);
    runner.start().unwrap();

    assert_eq!(
        dispatcher.take_events(),
        vec![
            PresentationEvent::DialogueStarted {
                node: "Start".to_string()
            },
            PresentationEvent::UnhandledCommand {
                text: "item give".to_string()
            },
            PresentationEvent::DisplayLine {
                text: String::new()
            },
        ]
    );
}

#[test]
fn test_blocking_command_pauses_until_resumed() {
    let parked: Rc<RefCell<Option<Continuation>>> = Rc::default();
    let (mut runner, dispatcher) = runner(&["fade out 2"]);

    let slot = Rc::clone(&parked);
    assert!(runner.register_blocking_command("fade", move |args, on_complete| {
        assert_eq!(args, ["out", "2"]);
        *slot.borrow_mut() = Some(on_complete);
    }));

    runner.start().unwrap();
    assert!(!dispatcher.is_waiting_for_continue());

    let continuation = parked.borrow_mut().take().unwrap();
    continuation.resume().unwrap();
    assert!(dispatcher.is_waiting_for_continue());
}

#[test]
fn test_blocking_command_resumed_synchronously() {
    let (mut runner, dispatcher) = runner(&["now"]);
    runner.register_blocking_command("now", |_, on_complete| {
        on_complete.resume().unwrap();
    });

    runner.start().unwrap();
    assert!(dispatcher.is_waiting_for_continue());
}

#[test]
fn test_remove_command() {
    let log = Log::default();
    let (mut runner, dispatcher) = runner(&["foo"]);
    runner.register_command("foo", recorder(&log, "h1"));
    assert!(runner.remove_command("foo"));

    runner.start().unwrap();
    assert!(log.borrow().is_empty());
    assert!(dispatcher.take_events().contains(&PresentationEvent::UnhandledCommand {
        text: "foo".to_string()
    }));
}

//=============================================================================
// 对象树扫描
//=============================================================================

/// 原生实现了命令提供者的宿主对象
struct Toolbox {
    log: Log,
}

impl HostObject for Toolbox {
    fn name(&self) -> &str {
        "toolbox"
    }

    fn has_method(&self, _method: &str) -> bool {
        false
    }

    fn call(&self, method: &str, _args: &[Variant]) -> Result<Variant, HostError> {
        Err(HostError::new(format!("no method {method}")))
    }

    fn as_command_provider(&self) -> Option<&dyn CommandProvider> {
        Some(self)
    }
}

impl CommandProvider for Toolbox {
    fn command_handlers(&self) -> Result<BTreeMap<String, CommandFn>, CapabilityError> {
        let log = Rc::clone(&self.log);
        let handler: CommandFn =
            Rc::new(move |args: &[String]| log.borrow_mut().push(format!("hammer {}", args.len())));
        Ok(BTreeMap::from([("hammer".to_string(), handler)]))
    }

    fn blocking_command_handlers(
        &self,
    ) -> Result<BTreeMap<String, BlockingCommandFn>, CapabilityError> {
        let handler: BlockingCommandFn =
            Rc::new(|_: &[String], on_complete: Continuation| on_complete.resume().unwrap());
        Ok(BTreeMap::from([("saw".to_string(), handler)]))
    }
}

fn scene(log: &Log) -> Rc<dyn HostObject> {
    let sing = {
        let log = Rc::clone(log);
        Callable::new(move |args| {
            log.borrow_mut().push(format!("sing {args:?}"));
            Ok(Variant::Nil)
        })
    };
    let bard = ScriptObject::new("bard")
        .with_method("command_handlers", move |_| {
            Ok(Variant::Dictionary(BTreeMap::from([(
                "sing".to_string(),
                Variant::Callable(sing.clone()),
            )])))
        })
        .into_rc();

    let wave_log = Rc::clone(log);
    let bow_log = Rc::clone(log);
    let npc = ScriptObject::new("npc")
        .with_typed_method(
            MethodInfo::new("wave").params([VariantType::Array]).command("wave"),
            move |args| {
                wave_log.borrow_mut().push(format!("wave {args:?}"));
                Ok(Variant::Nil)
            },
        )
        .with_typed_method(
            MethodInfo::new("bow")
                .params([VariantType::Array, VariantType::Callable])
                .command("bow"),
            move |args| {
                bow_log.borrow_mut().push("bow".to_string());
                match args {
                    [_, Variant::Callable(done)] => done.call(&[]),
                    _ => Err(HostError::new("bad args")),
                }
            },
        )
        .with_typed_method(
            MethodInfo::new("shout")
                .params([VariantType::String])
                .command("shout"),
            |_| Ok(Variant::Nil),
        )
        .with_typed_method(
            MethodInfo::new("helper").params([VariantType::Array]),
            |_| Ok(Variant::Nil),
        )
        .into_rc();

    let toolbox: Rc<dyn HostObject> = Rc::new(Toolbox {
        log: Rc::clone(log),
    });

    ScriptObject::new("root")
        .with_child(toolbox)
        .with_child(ScriptObject::new("stage").with_child(npc).into_rc())
        .with_child(bard)
        .into_rc()
}

#[test]
fn test_scan_for_commands() {
    let log = Log::default();
    let (mut runner, _) = runner(&[]);

    let added = runner.scan_for_commands(&scene(&log));
    assert_eq!(added, 5);

    let commands = runner.commands();
    let names: Vec<&str> = commands.names().collect();
    assert_eq!(
        names,
        vec!["hammer", "npc::bow", "npc::wave", "saw", "sing", "wait"]
    );
    assert!(commands.get("saw").unwrap().is_blocking());
    assert!(commands.get("npc::bow").unwrap().is_blocking());
    assert!(!commands.get("npc::wave").unwrap().is_blocking());
    assert!(!commands.contains("npc::shout"));
    assert!(!commands.contains("npc::helper"));
}

#[test]
fn test_scanned_commands_dispatch() {
    let log = Log::default();
    let (mut runner, dispatcher) =
        runner(&["hammer a b", "saw", "wave npc hi", "bow npc now", "sing loud"]);
    runner.scan_for_commands(&scene(&log));

    runner.start().unwrap();
    assert!(dispatcher.is_waiting_for_continue());
    assert_eq!(
        *log.borrow(),
        vec![
            "hammer 2".to_string(),
            format!("wave {:?}", [Variant::strings(["hi"])]),
            "bow".to_string(),
            format!("sing {:?}", [Variant::strings(["loud"])]),
        ]
    );
}

#[test]
fn test_scan_skips_duplicates() {
    let log = Log::default();
    let (mut runner, _) = runner(&[]);
    runner.register_command("hammer", |_| {});

    assert_eq!(runner.scan_for_commands(&scene(&log)), 4);
    assert_eq!(runner.scan_for_commands(&scene(&log)), 0);
}

#[test]
fn test_failing_host_command_does_not_stall() {
    let (mut runner, dispatcher) = runner(&["boom fx now", "fizzle fx now"]);

    let object = ScriptObject::new("fx")
        .with_typed_method(
            MethodInfo::new("boom").params([VariantType::Array]).command("boom"),
            |_| Err(HostError::new("exploded")),
        )
        .with_typed_method(
            MethodInfo::new("fizzle")
                .params([VariantType::Array, VariantType::Callable])
                .command("fizzle"),
            |_| Err(HostError::new("damp")),
        )
        .into_rc();
    assert_eq!(runner.scan_for_commands(&object), 2);

    runner.start().unwrap();
    assert!(dispatcher.is_waiting_for_continue());
    assert!(
        dispatcher
            .take_events()
            .iter()
            .all(|e| !matches!(e, PresentationEvent::UnhandledCommand { .. }))
    );
}

#[test]
fn test_tagged_command_name_differs_from_method() {
    let log = Log::default();
    let (mut runner, dispatcher) = runner(&["give item sword"]);

    let give_log = Rc::clone(&log);
    let item = ScriptObject::new("item")
        .with_typed_method(
            MethodInfo::new("hand_over")
                .params([VariantType::Array])
                .command("give"),
            move |args| {
                give_log.borrow_mut().push(format!("hand_over {args:?}"));
                Ok(Variant::Nil)
            },
        )
        .into_rc();

    assert_eq!(runner.scan_for_commands(&item), 1);
    assert!(runner.commands().contains("item::give"));
    assert!(!runner.commands().contains("item::hand_over"));

    runner.start().unwrap();
    assert_eq!(
        *log.borrow(),
        vec![format!("hand_over {:?}", [Variant::strings(["sword"])])]
    );
    assert!(
        dispatcher
            .take_events()
            .iter()
            .all(|e| !matches!(e, PresentationEvent::UnhandledCommand { .. }))
    );
}
