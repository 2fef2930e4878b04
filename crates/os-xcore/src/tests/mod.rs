//! Single-threaded routing between two kernels: messages move only when a
//! test calls `receive` on the receiving core.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use os_core::{CoreId, OsError, TaskId, TaskStateType, E_OK};
use os_kernel::{
    CoreKernel, CoreKernelBuilder, CorePhase, ErrorAction, HookKind, OsConfig, OsConfigBuilder,
    RemoteCall, RemoteReply, RemoteRequest, ServiceId, Step, TaskApi, TaskConfig, TaskExit,
    TaskState,
};
use os_trace::{records, TraceError, TraceHook};

use crate::message::{Message, Opcode, ReplySlot};
use crate::router::{CoreRouter, Interconnect};
use crate::sync::Arc;
use crate::XcoreError;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

fn init_logging() {
    Lazy::force(&LOGGER);
}

const CLIENT: TaskId = TaskId(0);
const LOW: TaskId = TaskId(1);
const TARGET: TaskId = TaskId(2);

fn builder(queue_size: usize) -> OsConfigBuilder {
    OsConfig::builder()
        .cores(2)
        .message_queue_size(queue_size)
        .task(TaskConfig::new(0, "client").priority(1))
        .task(TaskConfig::new(1, "low").core(1).priority(1).autostart())
        .task(TaskConfig::new(2, "target").core(1).priority(3))
        .queue_depth(1, 3, 4)
}

fn config(queue_size: usize) -> OsConfig {
    builder(queue_size).build().unwrap()
}

/// Two started kernels wired through one interconnect.
struct Rig {
    routers: Vec<Arc<CoreRouter>>,
    kernels: Vec<CoreKernel>,
}

impl Rig {
    fn new(config: OsConfig) -> Self {
        Self::with_link(config, |link| link)
    }

    fn with_link(config: OsConfig, link: impl FnOnce(Interconnect) -> Interconnect) -> Self {
        init_logging();
        let (wired, endpoints) = Interconnect::new(&config);
        let link = Arc::new(link(wired));
        let config = Arc::new(config);
        let mut routers = Vec::new();
        let mut kernels = Vec::new();
        for endpoint in endpoints {
            let router = CoreRouter::new(Arc::clone(&link), endpoint.inbox);
            let remote: os_kernel::RemoteRef = router.clone();
            let builder = CoreKernel::builder(Arc::clone(&config), endpoint.core).remote(remote);
            let mut kernel = bodies(builder, endpoint.core).build().unwrap();
            kernel.start().unwrap();
            routers.push(router);
            kernels.push(kernel);
        }
        Self { routers, kernels }
    }

    fn receive(&mut self, core: usize) -> usize {
        self.routers[core].receive(&mut self.kernels[core])
    }

    /// Sends `request` from core 0 to core 1 with a reply slot.
    fn request(&self, request: RemoteRequest) -> Arc<ReplySlot> {
        let slot = Arc::new(ReplySlot::new());
        let message =
            Message::request(CoreId(0), CoreId(1), &request).with_result(Arc::clone(&slot));
        self.routers[0].send(message).unwrap();
        slot
    }

    /// Lets core 1 handle its queue and core 0 take the answers.
    fn exchange(&mut self) {
        self.receive(1);
        self.receive(0);
    }
}

fn bodies(builder: CoreKernelBuilder, core: CoreId) -> CoreKernelBuilder {
    if core == CoreId(0) {
        return builder.task(CLIENT, |_api: &mut TaskApi<'_>| TaskExit::Terminate);
    }
    builder
        .task(LOW, |_api: &mut TaskApi<'_>| TaskExit::Continue)
        .task(TARGET, |_api: &mut TaskApi<'_>| TaskExit::Terminate)
}

#[test]
fn activation_from_another_core_preempts_the_running_task() {
    let mut rig = Rig::new(config(16));
    assert_eq!(rig.kernels[1].run_once(), Step::Ran(LOW));

    let slot = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    assert!(slot.is_waiting());
    assert_eq!(rig.routers[1].pending(), 1);

    assert_eq!(rig.receive(1), 1);
    assert_eq!(rig.kernels[1].task_state(TARGET), Some(TaskState::New));
    assert_eq!(rig.kernels[1].task_state(LOW), Some(TaskState::Running));
    assert!(slot.is_waiting());

    assert_eq!(rig.receive(0), 1);
    assert_eq!(slot.poll().map(|done| done.status), Some(E_OK));
    assert_eq!(slot.poll().unwrap().into_reply(), Ok(RemoteReply::Done));

    assert_eq!(rig.kernels[1].run_once(), Step::Ran(TARGET));
    assert_eq!(rig.kernels[1].task_state(LOW), Some(TaskState::ReadyAsync));
    assert_eq!(rig.kernels[1].stats().preemptions, 1);
    assert_eq!(rig.kernels[1].run_once(), Step::Ran(LOW));
}

#[test]
fn remote_error_is_reported_on_the_owning_core_only() {
    let mut rig = Rig::new(config(16));
    let slot = rig.request(RemoteRequest::SetEvent {
        task: TARGET,
        mask: 0b1,
    });
    rig.exchange();

    assert_eq!(slot.poll().unwrap().into_reply(), Err(OsError::Access));
    assert_eq!(rig.kernels[1].error_count(), 1);
    assert_eq!(
        rig.kernels[1].get_error_info().map(|info| info.error),
        Some(OsError::Access)
    );
    assert_eq!(rig.kernels[0].error_count(), 0);
}

#[test]
fn killing_the_caller_of_a_remote_request_spares_the_running_task() {
    let config = builder(16)
        .error_rule(
            ServiceId::ActivateTask,
            OsError::Limit,
            HookKind::None,
            ErrorAction::KillCaller,
        )
        .build()
        .unwrap();
    let mut rig = Rig::new(config);
    assert_eq!(rig.kernels[1].run_once(), Step::Ran(LOW));

    let first = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    let second = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    rig.exchange();

    assert_eq!(first.poll().unwrap().into_reply(), Ok(RemoteReply::Done));
    assert_eq!(second.poll().unwrap().into_reply(), Err(OsError::Limit));
    let info = rig.kernels[1].get_error_info().unwrap();
    assert_eq!(info.service, ServiceId::ActivateTask);
    assert_eq!(info.task, None);
    assert_eq!(info.isr, None);
    assert_eq!(rig.kernels[1].task_state(LOW), Some(TaskState::Running));
    assert_eq!(rig.kernels[1].task_state(TARGET), Some(TaskState::New));

    assert_eq!(rig.kernels[1].run_once(), Step::Ran(TARGET));
    assert_eq!(rig.kernels[1].task_state(LOW), Some(TaskState::ReadyAsync));
    assert_eq!(rig.kernels[1].run_once(), Step::Ran(LOW));
}

#[test]
fn requests_stay_queued_while_interrupts_are_disabled() {
    let mut rig = Rig::new(config(16));
    assert_eq!(rig.kernels[1].run_once(), Step::Ran(LOW));
    rig.kernels[1].disable_all_interrupts();

    let slot = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    rig.exchange();
    assert!(slot.is_waiting());
    assert_eq!(rig.routers[1].pending(), 1);
    assert_eq!(rig.kernels[1].error_count(), 0);
    assert_eq!(rig.kernels[1].task_state(TARGET), Some(TaskState::Suspended));

    rig.kernels[1].enable_all_interrupts();
    rig.exchange();
    assert_eq!(slot.poll().unwrap().into_reply(), Ok(RemoteReply::Done));
    assert_eq!(rig.routers[1].pending(), 0);
    assert_eq!(rig.kernels[1].task_state(TARGET), Some(TaskState::New));
    assert_eq!(rig.kernels[1].error_count(), 0);
}

#[test]
fn queries_come_back_typed() {
    let mut rig = Rig::new(config(16));
    rig.kernels[1].run_once();

    let state = rig.request(RemoteRequest::GetTaskState { task: LOW });
    let suspended = rig.request(RemoteRequest::GetTaskState { task: TARGET });
    rig.exchange();

    assert_eq!(
        state.poll().unwrap().into_reply(),
        Ok(RemoteReply::TaskState(TaskStateType::Running))
    );
    assert_eq!(
        suspended.poll().unwrap().into_reply(),
        Ok(RemoteReply::TaskState(TaskStateType::Suspended))
    );
    assert_eq!(rig.routers[1].stats().received, 2);
    assert_eq!(rig.routers[0].stats().received, 2);
}

#[test]
fn full_queue_refuses_the_send_with_limit() {
    let mut rig = Rig::new(config(4));
    let post = RemoteRequest::ActivateTask { task: TARGET };
    for _ in 0..3 {
        rig.routers[0]
            .post(&mut rig.kernels[0], CoreId(1), post)
            .unwrap();
    }
    assert_eq!(
        rig.routers[0].post(&mut rig.kernels[0], CoreId(1), post),
        Err(OsError::Limit)
    );
    assert_eq!(
        rig.routers[0].send(Message::request(CoreId(0), CoreId(1), &post)),
        Err(XcoreError::QueueFull { core: CoreId(1) })
    );
    assert_eq!(rig.routers[0].stats().rejected, 2);
    assert_eq!(rig.routers[1].pending(), 3);

    // The first activation succeeds, the other two exceed the limit.
    assert_eq!(rig.receive(1), 3);
    assert_eq!(rig.kernels[1].error_count(), 2);
}

#[test]
fn stopped_core_answers_with_core_error() {
    let mut rig = Rig::new(config(16));
    rig.kernels[1].shutdown_os(None).unwrap();

    let slot = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    rig.exchange();
    assert_eq!(slot.poll().unwrap().into_reply(), Err(OsError::Core));
    assert_eq!(rig.kernels[1].phase(), CorePhase::Shutdown(None));
}

#[test]
fn shutdown_request_stops_the_receiver() {
    let mut rig = Rig::new(config(16));
    rig.routers[0]
        .post(
            &mut rig.kernels[0],
            CoreId(1),
            RemoteRequest::ShutdownCore {
                error: Some(OsError::Value),
            },
        )
        .unwrap();
    rig.receive(1);

    assert_eq!(
        rig.kernels[1].phase(),
        CorePhase::Shutdown(Some(OsError::Value))
    );
    assert_eq!(rig.routers[0].pending(), 0);
    assert!(rig.kernels[0].is_running());
}

#[test]
fn malformed_request_is_answered_with_value_error() {
    let mut rig = Rig::new(config(16));
    let slot = Arc::new(ReplySlot::new());
    let message = Message::new(CoreId(0), CoreId(1), Opcode::ActivateTask)
        .params(&[70_000])
        .with_result(Arc::clone(&slot));
    rig.routers[0].send(message).unwrap();
    rig.exchange();

    assert_eq!(slot.poll().unwrap().into_reply(), Err(OsError::Value));
}

#[test]
fn a_core_cannot_message_itself() {
    let rig = Rig::new(config(16));
    let message = Message::new(CoreId(0), CoreId(0), Opcode::ActivateTask);
    assert_eq!(
        rig.routers[0].send(message),
        Err(XcoreError::LocalTarget(CoreId(0)))
    );
    let message = Message::new(CoreId(0), CoreId(5), Opcode::ActivateTask);
    assert_eq!(
        rig.routers[0].send(message),
        Err(XcoreError::UnknownCore(CoreId(5)))
    );
}

#[test]
fn traffic_is_traced() {
    let seen: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let hook: TraceHook = Arc::new(move |record: u8, payload: &[u8], _flush: bool| {
        sink.lock().unwrap().push((record, payload.to_vec()));
        Ok::<(), TraceError>(())
    });
    let mut rig = Rig::with_link(config(2), |link| link.with_trace_hook(hook));

    let slot = rig.request(RemoteRequest::ActivateTask { task: TARGET });
    let refused = rig.routers[0].send(Message::request(
        CoreId(0),
        CoreId(1),
        &RemoteRequest::ActivateTask { task: TARGET },
    ));
    assert!(refused.is_err());
    rig.exchange();
    assert!(!slot.is_waiting());

    let activate = Opcode::ActivateTask.raw() as u8;
    let result = Opcode::ReturnResult.raw() as u8;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (records::xcore::SEND, vec![0, 1, activate]),
            (records::xcore::QUEUE_FULL, vec![0, 1, activate]),
            (records::xcore::RECEIVE, vec![0, 1, activate]),
            (records::xcore::SEND, vec![1, 0, result]),
            (records::xcore::RECEIVE, vec![1, 0, result]),
        ]
    );
}
