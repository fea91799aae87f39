use state_machines::state_machine;

state_machine! {
    name: QueryMachine,
    state: QueryState,
    initial: Received,
    states: [Received, CacheChecked, Embedded, Retrieved, Scored, Generated, Answered, Failed],
    events {
        check_cache { transition: { from: Received, to: CacheChecked } }
        hit { transition: { from: CacheChecked, to: Answered } }
        embed { transition: { from: CacheChecked, to: Embedded } }
        retrieve { transition: { from: Embedded, to: Retrieved } }
        score { transition: { from: Retrieved, to: Scored } }
        generate { transition: { from: Scored, to: Generated } }
        store { transition: { from: Generated, to: Answered } }
        abort {
            transition: { from: Received, to: Failed }
            transition: { from: CacheChecked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Retrieved, to: Failed }
            transition: { from: Scored, to: Failed }
            transition: { from: Generated, to: Failed }
        }
    }
}

pub fn received() -> QueryMachine<(), Received> {
    QueryMachine::new(())
}
